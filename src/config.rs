//! Server configuration.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. The server is meant for local browsers only.
    pub host: String,
    /// Listening port, `0` picks an ephemeral one.
    pub port: u16,
    pub log_level: String,
    pub shutdown_delay_ms: u64,
    pub update_interval_ms: u64,
    pub accept_poll_ms: u64,
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 48484,
            log_level: "info".to_owned(),
            shutdown_delay_ms: 500,
            update_interval_ms: 100,
            accept_poll_ms: 50,
            max_request_bytes: 8192,
        }
    }
}

impl ServerConfig {
    /// Load a TOML config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<ServerConfig> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(ServerConfig::default());
        }

        let content = std::fs::read_to_string(path)?;
        ServerConfig::parse(&content)
    }

    pub fn parse(content: &str) -> Result<ServerConfig> {
        toml::from_str(content).map_err(Error::from)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    pub fn shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.shutdown_delay_ms)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }

    /// Base URL for a server bound at `addr`.
    pub fn base_url(addr: SocketAddr) -> String {
        format!("http://{}", addr)
    }
}
