//! Site poller: periodically syncs every registered site.
//!
//! One pass lists the sites and runs `sync_site` for each, with at most
//! `concurrency` syncs in flight. Passes run on a single task, so two passes
//! never overlap; a tick that arrives mid-pass is skipped.

use crate::error::{SyncError, SyncResult};
use crate::orchestrator::ActionOrchestrator;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use wphub_types::SiteId;

/// Configuration for the background poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between passes.
    pub interval_secs: u64,
    /// Maximum sites synced concurrently.
    pub concurrency: usize,
    /// When false the poller only runs on explicit `sync_now` requests.
    pub enabled: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            concurrency: 4,
            enabled: true,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Totals for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub sites: usize,
    pub succeeded: usize,
    pub failed: Vec<SiteId>,
}

/// Commands accepted by the poller.
#[derive(Debug)]
pub enum PollerCommand {
    /// Run a pass now. The summary is sent back if a reply channel is given.
    SyncNow {
        reply: Option<oneshot::Sender<PollSummary>>,
    },
    Stop,
}

/// Handle to send commands to a running poller.
#[derive(Clone)]
pub struct PollerHandle {
    command_tx: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Runs a pass and waits for its summary.
    pub async fn sync_now(&self) -> SyncResult<PollSummary> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(PollerCommand::SyncNow { reply: Some(reply) })
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    /// Stops the poller after any pass in progress.
    pub async fn stop(&self) -> SyncResult<()> {
        self.command_tx
            .send(PollerCommand::Stop)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// The poller task.
pub struct SitePoller {
    orchestrator: Arc<ActionOrchestrator>,
    config: PollerConfig,
    command_rx: mpsc::Receiver<PollerCommand>,
}

/// Creates a poller and its handle. Spawn [`SitePoller::run`] to start it.
pub fn create_poller(
    orchestrator: Arc<ActionOrchestrator>,
    config: PollerConfig,
) -> (PollerHandle, SitePoller) {
    let (command_tx, command_rx) = mpsc::channel(8);
    let handle = PollerHandle { command_tx };
    let poller = SitePoller {
        orchestrator,
        config,
        command_rx,
    };
    (handle, poller)
}

impl SitePoller {
    /// Runs until `Stop` is received or every handle is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "site poller started (interval {}s, concurrency {}, periodic {})",
            self.config.interval_secs, self.config.concurrency, self.config.enabled
        );

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::SyncNow { reply }) => {
                            let summary = self.poll_once().await;
                            if let Some(reply) = reply {
                                let _ = reply.send(summary);
                            }
                        }
                        Some(PollerCommand::Stop) | None => {
                            info!("site poller shutting down");
                            break;
                        }
                    }
                }

                _ = interval.tick(), if self.config.enabled => {
                    debug!("poll interval tick");
                    self.poll_once().await;
                }
            }
        }
    }

    /// Syncs every registered site once.
    pub async fn poll_once(&self) -> PollSummary {
        let db = self.orchestrator.database().clone();
        let sites = match tokio::task::spawn_blocking(move || db.sites().list_sites()).await {
            Ok(Ok(sites)) => sites,
            Ok(Err(e)) => {
                warn!("poller could not list sites: {e}");
                return PollSummary::default();
            }
            Err(e) => {
                warn!("spawn_blocking panicked listing sites: {e}");
                return PollSummary::default();
            }
        };

        let concurrency = self.config.concurrency.max(1);
        let orchestrator = &self.orchestrator;
        let results: Vec<(SiteId, SyncResult<()>)> = stream::iter(sites)
            .map(|site| async move {
                let result = orchestrator.sync_site(&site.id).await.map(|_| ());
                (site.id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = PollSummary {
            sites: results.len(),
            ..PollSummary::default()
        };
        for (site_id, result) in results {
            match result {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    debug!("poll of site {site_id} failed: {e}");
                    summary.failed.push(site_id);
                }
            }
        }
        summary.failed.sort();

        info!(
            "poll pass complete: {} sites, {} synced, {} failed",
            summary.sites,
            summary.succeeded,
            summary.failed.len()
        );
        summary
    }
}
