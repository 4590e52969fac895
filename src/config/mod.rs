//! On-disk configuration for the client and server halves, plus hot reload
//! of the client's fields that don't require re-binding a listener.

pub mod hot_reload;

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_filter_str())
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    1
}

/// Client-side configuration: where to listen locally, where the remote
/// server is, and the relay pool's sizing/retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub listen: SocketAddr,
    pub remote: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Empty means the SOCKS front end advertises `NoAuth`.
    #[serde(default)]
    pub socks_users: HashMap<String, String>,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: ClientConfig = toml::from_str(&text)
            .map_err(|e| ProxyError::Protocol(format!("invalid client config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(ProxyError::Protocol("client config: remote must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(ProxyError::Protocol("client config: pool_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Server-side configuration: where to accept inbound relay connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: ServerConfig = toml::from_str(&text)
            .map_err(|e| ProxyError::Protocol(format!("invalid server config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
