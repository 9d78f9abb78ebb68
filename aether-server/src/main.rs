//! Aether spatial hub server.
//!
//! Environment:
//! - `AETHER_BIND` (default `0.0.0.0:8080`)
//! - `AETHER_WS_PATH` (default `/ws`)
//! - `AETHER_CHUNK_SIZE` (default `100`)
//! - `AETHER_QUEUE_CAPACITY` (default `256`)
//! - `AETHER_LOG`, `AETHER_LOG_JSON`; `RUST_LOG` wins over `AETHER_LOG`

mod config;

use aether_hub::telemetry::{init_tracing, TracingConfig};
use aether_hub::Hub;
use aether_ws::WsServer;
use tracing::{error, info};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env()?;
    init_tracing(
        TracingConfig::default()
            .with_level(config.log_level.clone())
            .with_json(config.json_logs),
    );

    let (hub, runner) = Hub::new(config.hub.clone())?;
    let runner = tokio::spawn(runner.run());

    let server = WsServer::bind(config.bind_addr.as_str(), config.ws_path.clone()).await?;
    info!(
        addr = %server.local_addr()?,
        path = %config.ws_path,
        chunk_size = config.hub.chunk_size,
        queue_capacity = config.hub.outbound_queue_capacity,
        "aether server started"
    );

    tokio::select! {
        result = server.run(hub.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    hub.shutdown().await?;
    runner.await?;
    Ok(())
}
