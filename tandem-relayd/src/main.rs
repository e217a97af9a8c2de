//! tandem-relayd — relay daemon for pair interview sessions.
//!
//! Runs the WebSocket relay that fans shared-workspace updates out to the
//! participants of each session room. All room state is in memory; a
//! restart drops every room, which is acceptable for ephemeral sessions.
//!
//! Configuration comes from the environment:
//! - `TANDEM_BIND` — listen address (default `127.0.0.1:9090`)
//! - `TANDEM_RELAY_CAPACITY` — per-room frame buffer (default 256)
//! - `RUST_LOG` — log filter (env_logger)

use log::info;
use tandem_collab::server::{RelayServer, ServerConfig};

fn config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Ok(addr) = std::env::var("TANDEM_BIND") {
        config.bind_addr = addr;
    }
    if let Ok(capacity) = std::env::var("TANDEM_RELAY_CAPACITY") {
        match capacity.parse() {
            Ok(n) => config.relay_capacity = n,
            Err(_) => log::warn!("Ignoring invalid TANDEM_RELAY_CAPACITY: {capacity}"),
        }
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = config_from_env();
    info!("Starting tandem relay on {}", config.bind_addr);

    let server = RelayServer::new(config);
    server.run().await
}
