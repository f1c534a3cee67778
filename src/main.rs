//! Junqi Duel Server
//!
//! Binds the WebSocket lobby and runs until Ctrl-C.

use tracing::info;
use tracing_subscriber::EnvFilter;

use junqi_duel::{GameServer, LobbyConfig, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let lobby_config = LobbyConfig::from_env();

    info!("Junqi Duel Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!(
        "Challenge timeout {:?}, ping every {:?}, liveness timeout {:?}",
        lobby_config.challenge_timeout, lobby_config.ping_interval, lobby_config.liveness_timeout
    );

    let server = GameServer::new(config, lobby_config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
