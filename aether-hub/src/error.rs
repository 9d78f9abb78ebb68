//! Error types for the hub.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Hub is not running")]
    HubClosed,
}

impl HubError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Why an envelope could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Outbound queue is at capacity; the client is treated as unresponsive.
    Full,
    /// Queue already closed by unregister.
    Closed,
}
