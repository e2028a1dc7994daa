//! Connector error types.

use thiserror::Error;
use wphub_types::EntityKind;

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors that can occur while talking to a site's connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// HTTP 404: the connector does not implement this endpoint (usually an
    /// outdated connector version).
    #[error("connector endpoint {action} not present (HTTP 404)")]
    EndpointMissing { action: String, body: String },

    #[error("connector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("connector unreachable: {0}")]
    Unreachable(String),

    #[error("connector request timed out")]
    Timeout,

    #[error("invalid connector response: {0}")]
    InvalidResponse(String),

    /// The connector answered 2xx but reported `success: false` for a
    /// read-only call.
    #[error("connector rejected {action}: {message}")]
    Rejected { action: String, message: String },

    #[error("connector protocol has no {action} endpoint for {kind}s")]
    Unsupported { kind: EntityKind, action: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    /// True when the remote connector lacks the endpoint entirely.
    pub fn is_endpoint_missing(&self) -> bool {
        matches!(self, ConnectorError::EndpointMissing { .. })
    }

    /// True for failures worth one retry: the request may never have reached
    /// the site.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Unreachable(_) | ConnectorError::Timeout)
    }

    /// Upstream HTTP status, when the site answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            ConnectorError::EndpointMissing { .. } => Some(404),
            ConnectorError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Upstream response body, verbatim.
    pub fn upstream_body(&self) -> Option<&str> {
        match self {
            ConnectorError::EndpointMissing { body, .. } | ConnectorError::Status { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ConnectorError::Timeout
        } else if e.is_connect() || e.is_request() {
            ConnectorError::Unreachable(e.to_string())
        } else if e.is_decode() {
            ConnectorError::InvalidResponse(e.to_string())
        } else {
            ConnectorError::Unreachable(e.to_string())
        }
    }
}
