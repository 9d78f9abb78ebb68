//! Hub configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{HubError, Result};
use crate::region::ChunkSize;

/// Hub configuration. Fixed once the hub is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub chunk_size: f64,
    pub outbound_queue_capacity: usize,
    pub pong_wait_ms: u64,
    pub ping_period_ms: u64,
    pub write_wait_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            chunk_size: ChunkSize::DEFAULT,
            outbound_queue_capacity: 256,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            write_wait_ms: 10_000,
            max_frame_bytes: 512 * 1024,
        }
    }
}

impl HubConfig {
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        ChunkSize::new(self.chunk_size)?;
        if self.outbound_queue_capacity == 0 {
            return Err(HubError::config("outbound queue capacity must be at least 1"));
        }
        if self.ping_period_ms == 0 || self.write_wait_ms == 0 {
            return Err(HubError::config("ping period and write wait must be non-zero"));
        }
        if self.ping_period_ms >= self.pong_wait_ms {
            return Err(HubError::config(format!(
                "ping period ({}ms) must be shorter than pong wait ({}ms)",
                self.ping_period_ms, self.pong_wait_ms
            )));
        }
        if self.max_frame_bytes == 0 {
            return Err(HubError::config("max frame size must be non-zero"));
        }
        Ok(())
    }

    pub fn chunk(&self) -> Result<ChunkSize> {
        ChunkSize::new(self.chunk_size)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// A keepalive tick skips its ping if the peer was heard from within
    /// this window. Half the slack between the ping period and the read
    /// deadline is left for the next ping's round trip.
    pub fn keepalive_quiet_window(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms.saturating_sub(self.ping_period_ms) / 2)
    }
}

/// Builder for [`HubConfig`].
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
        }
    }

    pub fn chunk_size(mut self, size: f64) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_queue_capacity = capacity;
        self
    }

    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.config.pong_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn ping_period(mut self, period: Duration) -> Self {
        self.config.ping_period_ms = period.as_millis() as u64;
        self
    }

    pub fn write_wait(mut self, wait: Duration) -> Self {
        self.config.write_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn max_frame_bytes(mut self, max: usize) -> Self {
        self.config.max_frame_bytes = max;
        self
    }

    pub fn build(self) -> Result<HubConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for HubConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
