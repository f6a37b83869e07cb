use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use thiserror::Error;

/// Paths served by the operational endpoints.
const RESERVED_PATHS: [&str; 3] = ["/healthz", "/debug/stats", "/metrics"];

#[derive(Debug, Parser)]
#[command(
    name = "beach-ring",
    author,
    version,
    about = "Beach Ring call signaling relay"
)]
pub struct Cli {
    /// Address to bind the listener to.
    #[arg(long, env = "BEACH_RING_LISTEN_ADDR", default_value = "0.0.0.0:80")]
    pub listen_addr: String,

    /// Path the websocket endpoint is served on.
    #[arg(long, env = "BEACH_RING_WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_RING_SHUTDOWN_GRACE_SECS", default_value_t = 0)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub ws_path: String,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}: {1}")]
    ListenAddr(String, std::net::AddrParseError),
    #[error("websocket path must start with '/': {0:?}")]
    WsPath(String),
    #[error("websocket path {0:?} collides with an operational endpoint")]
    ReservedPath(String),
}

impl TryFrom<Cli> for ServerConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .map_err(|err| ConfigError::ListenAddr(cli.listen_addr.clone(), err))?;
        if !cli.ws_path.starts_with('/') {
            return Err(ConfigError::WsPath(cli.ws_path));
        }
        if RESERVED_PATHS.contains(&cli.ws_path.as_str()) {
            return Err(ConfigError::ReservedPath(cli.ws_path));
        }
        Ok(ServerConfig {
            listen_addr,
            ws_path: cli.ws_path,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 80)),
            ws_path: "/ws".to_string(),
            shutdown_grace: Duration::ZERO,
        }
    }
}
