//! Server configuration.

use std::str::FromStr;

use aether_hub::{HubConfig, HubError, Result};

/// Process configuration for the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub ws_path: String,
    pub log_level: String,
    pub json_logs: bool,
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            ws_path: aether_ws::DEFAULT_PATH.into(),
            log_level: "info".into(),
            json_logs: false,
            hub: HubConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `AETHER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(bind) = lookup("AETHER_BIND") {
            config.bind_addr = bind;
        }
        if let Some(path) = lookup("AETHER_WS_PATH") {
            if !path.starts_with('/') {
                return Err(HubError::config(format!("AETHER_WS_PATH must start with '/': {path}")));
            }
            config.ws_path = path;
        }
        if let Some(level) = lookup("AETHER_LOG") {
            config.log_level = level;
        }
        if let Some(json) = lookup("AETHER_LOG_JSON") {
            config.json_logs = parse_var("AETHER_LOG_JSON", &json)?;
        }
        if let Some(size) = lookup("AETHER_CHUNK_SIZE") {
            config.hub.chunk_size = parse_var("AETHER_CHUNK_SIZE", &size)?;
        }
        if let Some(capacity) = lookup("AETHER_QUEUE_CAPACITY") {
            config.hub.outbound_queue_capacity = parse_var("AETHER_QUEUE_CAPACITY", &capacity)?;
        }
        config.hub.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HubError::config(format!("invalid {key}: {value:?}")))
}
