//! Sync error types.

use crate::state::TransitionError;
use thiserror::Error;
use wphub_connector::ConnectorError;
use wphub_storage::StorageError;

/// Result type for reconciliation and orchestration.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the reconciler, orchestrator and poller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transport or HTTP failure talking to the site. Nothing was written.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The connector answered but reported `success: false`.
    #[error("connector rejected {action}: {message}")]
    ActionRejected { action: String, message: String },

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("activity log error: {0}")]
    Activity(String),

    #[error("background task failed: {0}")]
    Join(String),

    #[error("poller channel closed")]
    ChannelClosed,
}
