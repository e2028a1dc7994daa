//! Inventory reconciliation and action orchestration for the wphub control plane.
//!
//! - [`state`]: pure installation state machine
//! - [`reconciler`]: applies a connector's inventory report to one site's rows
//! - [`orchestrator`]: runs install/uninstall/activate/deactivate/toggle
//!   against a site and records the outcome
//! - [`poller`]: periodic background sync of every registered site
//! - [`activity`]: best-effort activity log seam
//!
//! The orchestrator owns all I/O; the state machine and the reconciler's
//! decision logic are pure.

pub mod activity;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
pub mod state;

pub use activity::{ActivityEntry, ActivityLog, ActivityOutcome, MemoryActivityLog, TracingActivityLog};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{
    ActionOrchestrator, ActionOutcome, ConnectorUpdateOutcome, EntityRef, KindSync, SiteSyncOutcome,
};
pub use poller::{create_poller, PollSummary, PollerCommand, PollerConfig, PollerHandle, SitePoller};
pub use reconciler::{ReconcileFailure, ReconcileReport, Reconciler, DEFAULT_INSTALLING_GRACE_SECS};
pub use state::{InstallationState, TransitionError, Trigger};
