//! In-process transport.
//!
//! [`pair`] returns the server-side halves plus a [`MemoryPeer`] that plays
//! the remote client. The peer answers pings automatically unless told not
//! to, and both directions can be made to fail on demand.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Frame, FrameReader, FrameWriter};
use crate::protocol::{decode_batch, Envelope};

/// Create a connected in-memory transport.
pub fn pair() -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let auto_pong = Arc::new(AtomicBool::new(true));
    let fail_writes = Arc::new(AtomicBool::new(false));

    let reader = MemoryReader { rx: from_peer };
    let writer = MemoryWriter {
        tx: to_peer,
        pong_tx: to_server.downgrade(),
        auto_pong: Arc::clone(&auto_pong),
        fail_writes: Arc::clone(&fail_writes),
    };
    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
        pending: VecDeque::new(),
        auto_pong,
        fail_writes,
    };
    (reader, writer, peer)
}

pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<io::Result<Frame>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn next_frame(&mut self) -> Option<io::Result<Frame>> {
        self.rx.recv().await
    }
}

pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Frame>,
    pong_tx: mpsc::WeakUnboundedSender<io::Result<Frame>>,
    auto_pong: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send(&mut self, frame: Frame) -> io::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failure injected"));
        }
        if let Frame::Ping(data) = &frame {
            if self.auto_pong.load(Ordering::Relaxed) {
                if let Some(tx) = self.pong_tx.upgrade() {
                    let _ = tx.send(Ok(Frame::Pong(data.clone())));
                }
            }
        }
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<io::Result<Frame>>>,
    rx: mpsc::UnboundedReceiver<Frame>,
    pending: VecDeque<Envelope>,
    auto_pong: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn send(&self, frame: Frame) -> bool {
        self.tx
            .as_ref()
            .map(|tx| tx.send(Ok(frame)).is_ok())
            .unwrap_or(false)
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Make the server's next read fail.
    pub fn fail_read(&self, kind: io::ErrorKind) -> bool {
        self.tx
            .as_ref()
            .map(|tx| tx.send(Err(io::Error::new(kind, "read failure injected"))).is_ok())
            .unwrap_or(false)
    }

    /// Make every subsequent server write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::Relaxed);
    }

    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::Relaxed);
    }

    /// Next raw frame written by the server.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Next envelope written by the server, splitting coalesced frames and
    /// skipping control frames. `None` once the server closes.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(envelope);
            }
            match self.rx.recv().await? {
                Frame::Text(text) => self.pending.extend(decode_batch(&text)),
                Frame::Binary(data) => {
                    if let Ok(text) = std::str::from_utf8(&data) {
                        self.pending.extend(decode_batch(text));
                    }
                }
                Frame::Close => return None,
                Frame::Ping(_) | Frame::Pong(_) => {}
            }
        }
    }

    /// Like [`MemoryPeer::next_envelope`] but only looks at frames already
    /// written.
    pub fn try_next_envelope(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(envelope);
            }
            match self.rx.try_recv().ok()? {
                Frame::Text(text) => self.pending.extend(decode_batch(&text)),
                Frame::Close => return None,
                _ => {}
            }
        }
    }

    /// Hang up. The server sees end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
