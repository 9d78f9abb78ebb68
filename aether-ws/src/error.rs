//! Error types for aether-ws.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, WsError>;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Hub error: {0}")]
    Hub(#[from] aether_hub::HubError),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

impl WsError {
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed(reason.into())
    }
}

/// Flatten a WebSocket error into the `io::Error` the hub transport expects.
pub(crate) fn ws_to_io(e: tungstenite::Error) -> io::Error {
    match e {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
        }
        other => io::Error::other(other.to_string()),
    }
}
