//! Logging setup.
//!
//! # Example
//!
//! ```rust,ignore
//! use aether_hub::telemetry::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::default().with_level("aether_hub=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing configuration.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is not set (e.g. "info", "aether_hub=debug").
    pub log_level: String,
    /// Output logs as JSON.
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self, enabled: bool) -> Self {
        self.json_output = enabled;
        self
    }
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init_tracing(config: TracingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_output {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().is_ok()
    }
}
