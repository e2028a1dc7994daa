//! Activity log: a record of every action the control plane ran against a
//! site.
//!
//! Recording is best-effort: the orchestrator logs a failed `record` call and
//! carries on. `TracingActivityLog` is the default sink; `MemoryActivityLog`
//! keeps a bounded in-memory trail for tests and embedders.

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use wphub_types::{EntityId, EntityKind, SiteId};

/// How an action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityOutcome {
    Succeeded,
    /// The connector acknowledged the request with `success: false`.
    Rejected,
    /// The connector could not be reached or answered with an error status.
    Failed,
}

impl fmt::Display for ActivityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityOutcome::Succeeded => write!(f, "succeeded"),
            ActivityOutcome::Rejected => write!(f, "rejected"),
            ActivityOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// A single activity log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub site_id: SiteId,
    pub entity_id: Option<EntityId>,
    pub kind: Option<EntityKind>,
    pub action: String,
    pub outcome: ActivityOutcome,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(site_id: SiteId, action: impl Into<String>, outcome: ActivityOutcome) -> Self {
        Self {
            site_id,
            entity_id: None,
            kind: None,
            action: action.into(),
            outcome,
            detail: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_entity(mut self, kind: EntityKind, entity_id: EntityId) -> Self {
        self.kind = Some(kind);
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Sink for activity entries.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, entry: ActivityEntry) -> SyncResult<()>;
}

/// Writes each entry as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(&self, entry: ActivityEntry) -> SyncResult<()> {
        tracing::info!(
            target: "wphub::activity",
            site_id = %entry.site_id,
            entity_id = ?entry.entity_id,
            kind = ?entry.kind,
            action = %entry.action,
            outcome = %entry.outcome,
            "{}",
            entry.detail
        );
        Ok(())
    }
}

/// Bounded in-memory activity trail. Oldest entries are dropped first.
#[derive(Clone)]
pub struct MemoryActivityLog {
    entries: Arc<RwLock<Vec<ActivityEntry>>>,
    max_entries: usize,
}

impl MemoryActivityLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub async fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryActivityLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn record(&self, entry: ActivityEntry) -> SyncResult<()> {
        let mut log = self.entries.write().await;
        log.push(entry);

        if log.len() > self.max_entries {
            let drain_count = log.len() - self.max_entries;
            log.drain(..drain_count);
        }
        Ok(())
    }
}
