//! Control-plane configuration.
//!
//! Read from an optional JSON file named by `WPHUB_CONFIG`, then overridden
//! by `WPHUB_BIND`, `WPHUB_DATABASE` and `WPHUB_API_TOKENS` (comma-separated).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wphub_connector::ConnectorConfig;
use wphub_sync::PollerConfig;

pub const CONFIG_ENV: &str = "WPHUB_CONFIG";
pub const BIND_ENV: &str = "WPHUB_BIND";
pub const DATABASE_ENV: &str = "WPHUB_DATABASE";
pub const TOKENS_ENV: &str = "WPHUB_API_TOKENS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub bind_addr: String,

    /// SQLite database file.
    pub database_path: PathBuf,

    /// Bearer tokens accepted on `/api/*`.
    pub api_tokens: Vec<String>,

    pub connector: ConnectorConfig,

    pub poller: PollerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            database_path: PathBuf::from("wphub.db"),
            api_tokens: Vec::new(),
            connector: ConnectorConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration using `lookup` for environment variables.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind_addr = bind;
        }
        if let Some(db) = lookup(DATABASE_ENV) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(tokens) = lookup(TOKENS_ENV) {
            self.api_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.api_tokens.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "no API tokens configured (set {TOKENS_ENV} or api_tokens)"
            )));
        }
        if self.poller.concurrency == 0 {
            return Err(ConfigError::Invalid("poller.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind_addr {:?}: {e}", self.bind_addr)))
    }
}
