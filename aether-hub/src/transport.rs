//! Transport abstraction for client connections.
//!
//! A connection is split into a [`FrameReader`] owned by the inbound pump and
//! a [`FrameWriter`] owned by the outbound pump. Backends:
//! - WebSocket (`aether-ws`) for browser clients
//! - [`memory`] for tests and in-process clients

use std::io;

use async_trait::async_trait;

pub mod memory;

/// A transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half of a client connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next frame, or `None` once the peer is gone.
    async fn next_frame(&mut self) -> Option<io::Result<Frame>>;
}

/// Sending half of a client connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn send(&mut self, frame: Frame) -> io::Result<()>;
}
