//! WebSocket server feeding connections into a [`Hub`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use aether_hub::{generate_participant_id, Hub, HubConfig, Participant, Position};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, warn};

use crate::transport::{split, WsReader, WsWriter};
use crate::{Result, WsError};

/// Default upgrade path.
pub const DEFAULT_PATH: &str = "/ws";

/// An upgraded connection, ready to hand to the hub.
pub struct WsConnection {
    pub peer_addr: SocketAddr,
    /// `?name=` from the upgrade request.
    pub username: Option<String>,
    pub reader: WsReader<TcpStream>,
    pub writer: WsWriter<TcpStream>,
}

/// WebSocket server that accepts incoming connections
pub struct WsServer {
    listener: TcpListener,
    path: Arc<str>,
    max_message_bytes: usize,
}

impl WsServer {
    /// Bind to an address, accepting upgrades on `path` only.
    pub async fn bind<A: ToSocketAddrs>(addr: A, path: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            path: Arc::from(path.into()),
            max_message_bytes: HubConfig::default().max_frame_bytes,
        })
    }

    /// Largest message [`WsServer::accept`] will buffer. [`WsServer::run`]
    /// uses the hub's `max_frame_bytes` instead.
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Accept one TCP connection and complete its WebSocket handshake.
    pub async fn accept(&self) -> Result<WsConnection> {
        let (stream, peer_addr) = self.listener.accept().await?;
        upgrade(stream, peer_addr, &self.path, self.max_message_bytes).await
    }

    /// Accept connections forever, registering each one with `hub` at the
    /// origin under a fresh id. Handshakes run on their own tasks.
    pub async fn run(self, hub: Arc<Hub>) -> Result<()> {
        let max_message_bytes = hub.config().max_frame_bytes;
        info!(addr = %self.local_addr()?, path = %self.path, max_message_bytes, "websocket server listening");
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let hub = Arc::clone(&hub);
            let path = Arc::clone(&self.path);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(hub, stream, peer_addr, &path, max_message_bytes).await {
                    warn!(%peer_addr, error = %e, "connection rejected");
                }
            });
        }
    }
}

async fn serve_connection(
    hub: Arc<Hub>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    path: &str,
    max_message_bytes: usize,
) -> Result<()> {
    let conn = upgrade(stream, peer_addr, path, max_message_bytes).await?;
    let mut participant = Participant::new(generate_participant_id(), Position::ORIGIN, hub.chunk());
    if let Some(name) = conn.username {
        participant = participant.with_username(name);
    }
    debug!(%peer_addr, client_id = %participant.id, "websocket upgraded");
    hub.connect(participant, conn.reader, conn.writer)
        .await?
        .join()
        .await;
    debug!(%peer_addr, "websocket connection finished");
    Ok(())
}

/// Complete the server side of the handshake on `stream`. Requests for any
/// other path are answered with 404. Messages over `max_message_bytes` fail
/// the read and end the connection.
pub async fn upgrade(
    stream: TcpStream,
    peer_addr: SocketAddr,
    path: &str,
    max_message_bytes: usize,
) -> Result<WsConnection> {
    let mut username = None;
    let callback = |req: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() != path {
            let mut rejection = ErrorResponse::new(Some("not found".into()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        username = req.uri().query().and_then(name_from_query);
        Ok(response)
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_bytes);
    config.max_frame_size = Some(max_message_bytes);

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config))
        .await
        .map_err(|e| WsError::handshake(e.to_string()))?;
    let (reader, writer) = split(ws);
    Ok(WsConnection {
        peer_addr,
        username,
        reader,
        writer,
    })
}

/// Non-empty `name` parameter of a query string.
fn name_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_query() {
        assert_eq!(name_from_query("name=ada"), Some("ada".into()));
        assert_eq!(name_from_query("x=1&name=grace%20h"), Some("grace h".into()));
        assert_eq!(name_from_query("name="), None);
        assert_eq!(name_from_query("other=1"), None);
    }

    #[tokio::test]
    async fn test_server_bind() {
        let server = WsServer::bind("127.0.0.1:0", DEFAULT_PATH).await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        assert_eq!(server.path(), "/ws");
    }

    #[tokio::test]
    async fn test_accept_enforces_message_limit() {
        use aether_hub::FrameReader;
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::Message;

        let server = WsServer::bind("127.0.0.1:0", DEFAULT_PATH)
            .await
            .unwrap()
            .with_max_message_bytes(64);
        let url = format!("ws://{}/ws", server.local_addr().unwrap());

        let client = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            ws.send(Message::Text("x".repeat(128))).await.unwrap();
            ws
        });

        let mut conn = server.accept().await.unwrap();
        let _ws = client.await.unwrap();
        assert!(matches!(conn.reader.next_frame().await, Some(Err(_))));
    }
}
