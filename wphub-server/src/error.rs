//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;
use wphub_connector::ConnectorError;
use wphub_sync::SyncError;

/// An error returned to API callers as `{success: false, message, code, ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub upstream_status: Option<u16>,
    pub upstream_body: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_body: Option<&'a str>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            upstream_status: None,
            upstream_body: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid bearer token")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    fn connector(err: ConnectorError) -> Self {
        let code = match &err {
            ConnectorError::EndpointMissing { .. } => "connector_endpoint_missing",
            ConnectorError::Unreachable(_) | ConnectorError::Timeout => "connector_unreachable",
            ConnectorError::Rejected { .. } => "connector_rejected",
            ConnectorError::Unsupported { .. } => {
                return Self::bad_request(err.to_string());
            }
            ConnectorError::Serialization(_) | ConnectorError::Config(_) => {
                error!("connector client failure: {err}");
                return Self::internal(err.to_string());
            }
            ConnectorError::Status { .. } | ConnectorError::InvalidResponse(_) => "connector_error",
        };
        Self {
            status: StatusCode::BAD_GATEWAY,
            code,
            message: err.to_string(),
            upstream_status: err.upstream_status(),
            upstream_body: err.upstream_body().map(str::to_string),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Validation(msg) => Self::bad_request(msg),
            SyncError::NotFound(msg) => Self::not_found(msg),
            SyncError::Connector(e) => Self::connector(e),
            SyncError::ActionRejected { action, message } => Self::new(
                StatusCode::BAD_GATEWAY,
                "connector_rejected",
                format!("connector rejected {action}: {message}"),
            ),
            SyncError::Conflict(msg) => Self::new(StatusCode::CONFLICT, "conflict", msg),
            SyncError::Transition(e) => Self::new(StatusCode::CONFLICT, "conflict", e.to_string()),
            other @ (SyncError::Storage(_)
            | SyncError::Activity(_)
            | SyncError::Join(_)
            | SyncError::ChannelClosed) => {
                error!("internal error: {other}");
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            message: &self.message,
            code: self.code,
            upstream_status: self.upstream_status,
            upstream_body: self.upstream_body.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}
