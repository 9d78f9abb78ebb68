//! WebSocket transport for aether-hub.
//!
//! Browser clients connect to `ws://host:port/ws?name=<username>`. Each
//! upgraded socket is split into a [`WsReader`] and [`WsWriter`] that the
//! hub's pumps drive.
//!
//! ```rust,ignore
//! use aether_hub::{Hub, HubConfig};
//! use aether_ws::WsServer;
//!
//! let (hub, _runner) = Hub::spawn(HubConfig::default())?;
//! WsServer::bind("0.0.0.0:8080", "/ws").await?.run(hub).await?;
//! ```

mod error;
mod server;
mod transport;

pub use error::{Result, WsError};
pub use server::{upgrade, WsConnection, WsServer, DEFAULT_PATH};
pub use transport::{split, WsReader, WsWriter};
