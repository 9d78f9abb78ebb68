//! World coordinates and region keys.
//!
//! The world is cut into axis-aligned cubes of `chunk_size` units. A
//! position's region key is the componentwise floor of `position / chunk_size`,
//! so negative coordinates land in negative regions (`-0.5` → `-1`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Raw world coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Edge length of a region. Validated once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSize(f64);

impl ChunkSize {
    pub const DEFAULT: f64 = 100.0;

    pub fn new(size: f64) -> Result<Self> {
        if !size.is_finite() || size <= 0.0 {
            return Err(HubError::config(format!(
                "chunk size must be a positive finite number, got {size}"
            )));
        }
        Ok(Self(size))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// Region containing `pos`.
    #[inline]
    pub fn region_of(self, pos: &Position) -> RegionKey {
        RegionKey::from_position(pos, self)
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Integer triple naming one region. Serialized with the field names the
/// browser client expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RegionKey {
    #[serde(rename = "chunkX")]
    pub x: i64,
    #[serde(rename = "chunkY")]
    pub y: i64,
    #[serde(rename = "chunkZ")]
    pub z: i64,
}

impl RegionKey {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub fn from_position(pos: &Position, chunk: ChunkSize) -> Self {
        let size = chunk.get();
        Self {
            x: (pos.x / size).floor() as i64,
            y: (pos.y / size).floor() as i64,
            z: (pos.z / size).floor() as i64,
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

impl FromStr for RegionKey {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<i64>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(Self { x, y, z }),
            _ => Err(HubError::protocol(format!("invalid region key: {s:?}"))),
        }
    }
}
