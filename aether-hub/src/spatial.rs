//! Region → members index.
//!
//! Buckets and the reverse `member → region` map live behind one `RwLock`, so
//! every structural change (add, remove, move) is a single exclusive section
//! and a [`SpatialIndex::members`] snapshot can never see a member in two
//! buckets or in none. Readers copy the bucket out and release the lock
//! before doing any delivery work.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::participant::ParticipantId;
use crate::region::RegionKey;

struct IndexInner<T> {
    buckets: HashMap<RegionKey, HashMap<ParticipantId, T>>,
    locations: HashMap<ParticipantId, RegionKey>,
}

/// Exact, concurrently readable region membership.
pub struct SpatialIndex<T> {
    inner: RwLock<IndexInner<T>>,
}

impl<T: Clone> SpatialIndex<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                buckets: HashMap::new(),
                locations: HashMap::new(),
            }),
        }
    }

    /// Insert `id` into `region`. Returns false if `id` is already indexed
    /// anywhere; a member occupies exactly one region.
    pub fn add(&self, region: RegionKey, id: ParticipantId, member: T) -> bool {
        let mut inner = self.inner.write();
        if inner.locations.contains_key(&id) {
            return false;
        }
        inner.locations.insert(id, region);
        inner.buckets.entry(region).or_default().insert(id, member);
        true
    }

    /// Remove `id` from `region`. No-op if it is not there.
    pub fn remove(&self, region: RegionKey, id: ParticipantId) -> Option<T> {
        let mut inner = self.inner.write();
        if inner.locations.get(&id) != Some(&region) {
            return None;
        }
        inner.locations.remove(&id);
        take_from_bucket(&mut inner.buckets, region, id)
    }

    /// Remove `id` from wherever it currently is.
    pub fn remove_member(&self, id: ParticipantId) -> Option<(RegionKey, T)> {
        let mut inner = self.inner.write();
        let region = inner.locations.remove(&id)?;
        take_from_bucket(&mut inner.buckets, region, id).map(|member| (region, member))
    }

    /// Move `id` from `from` to `to` in one critical section. Returns false,
    /// leaving the index untouched, if `id` is not currently in `from`.
    pub fn move_member(&self, id: ParticipantId, from: RegionKey, to: RegionKey) -> bool {
        let mut inner = self.inner.write();
        if inner.locations.get(&id) != Some(&from) {
            return false;
        }
        if from == to {
            return true;
        }
        let Some(member) = take_from_bucket(&mut inner.buckets, from, id) else {
            return false;
        };
        inner.buckets.entry(to).or_default().insert(id, member);
        inner.locations.insert(id, to);
        true
    }

    /// Snapshot of the members of `region`. Empty for unknown regions.
    pub fn members(&self, region: RegionKey) -> Vec<T> {
        self.inner
            .read()
            .buckets
            .get(&region)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Member ids of `region`.
    pub fn member_ids(&self, region: RegionKey) -> Vec<ParticipantId> {
        self.inner
            .read()
            .buckets
            .get(&region)
            .map(|bucket| bucket.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn region_of(&self, id: ParticipantId) -> Option<RegionKey> {
        self.inner.read().locations.get(&id).copied()
    }

    pub fn contains(&self, region: RegionKey, id: ParticipantId) -> bool {
        self.inner.read().locations.get(&id) == Some(&region)
    }

    /// Number of occupied regions.
    pub fn region_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    /// Number of indexed members across all regions.
    pub fn len(&self) -> usize {
        self.inner.read().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().locations.is_empty()
    }

    /// Occupied regions and their sizes.
    pub fn occupancy(&self) -> Vec<(RegionKey, usize)> {
        self.inner
            .read()
            .buckets
            .iter()
            .map(|(region, bucket)| (*region, bucket.len()))
            .collect()
    }
}

impl<T: Clone> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `id` from the bucket, pruning the bucket when it empties.
fn take_from_bucket<T>(
    buckets: &mut HashMap<RegionKey, HashMap<ParticipantId, T>>,
    region: RegionKey,
    id: ParticipantId,
) -> Option<T> {
    let bucket = buckets.get_mut(&region)?;
    let member = bucket.remove(&id);
    if bucket.is_empty() {
        buckets.remove(&region);
    }
    member
}
