use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default gRPC port
pub const DEFAULT_RPC_PORT: u16 = 9090;

/// Default HTTP gateway port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// gRPC server port
    pub rpc_port: u16,

    /// HTTP gateway port
    pub http_port: u16,

    /// Upper bound for the gateway's graceful shutdown, in seconds.
    /// `None` waits for in-flight requests indefinitely.
    pub shutdown_timeout_secs: Option<u64>,

    /// Timeout for the gateway's dial to the gRPC server, in seconds
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_port: DEFAULT_RPC_PORT,
            http_port: DEFAULT_HTTP_PORT,
            shutdown_timeout_secs: None,
            connect_timeout_secs: 5,
        }
    }
}

/// Returns the built-in configuration. Never reads the environment.
pub fn get_config() -> Config {
    Config::default()
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = parse_env("SERVER_RPC_PORT") {
            config.rpc_port = port;
        }

        if let Some(port) = parse_env("SERVER_HTTP_PORT") {
            config.http_port = port;
        }

        if let Some(secs) = parse_env("SERVER_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout_secs = Some(secs);
        }

        if let Some(secs) = parse_env("SERVER_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = secs;
        }

        config
    }

    /// Address the gateway dials to reach the gRPC server
    pub fn rpc_dial_addr(&self) -> String {
        format!("localhost:{}", self.rpc_port)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_secs.map(Duration::from_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
