//! Connector client configuration.

use serde::{Deserialize, Serialize};

/// Configuration for outbound connector calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Retry once when the request fails before reaching the site.
    pub retry_transient: bool,

    /// Delay before the single retry, in milliseconds.
    pub retry_backoff_ms: u64,

    /// User-Agent sent to connectors.
    pub user_agent: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            retry_transient: true,
            retry_backoff_ms: 500,
            user_agent: format!("wphub-control-plane/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ConnectorConfig {
    /// Short timeouts and no backoff, for tests against local mock servers.
    pub fn fast() -> Self {
        Self {
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
            retry_transient: true,
            retry_backoff_ms: 0,
            ..Self::default()
        }
    }
}
