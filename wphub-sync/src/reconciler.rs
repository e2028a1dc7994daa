//! Catalog reconciler: applies one site's authoritative inventory report to
//! that site's installation rows.
//!
//! Work is scoped to the site: only the reported slugs are resolved against
//! the catalog, and only the site's own rows are read or written. Writes are
//! conditional on `row_version`; a conflicting row is re-read and the report
//! applied once more, since the report is the newest information we have.
//!
//! Rows the report omits are driven to `available`/`unavailable`. That
//! covers present rows and rows left without a version in `error`,
//! `active`/`inactive`, or an `installing` marker older than the grace
//! period.

use crate::error::{SyncError, SyncResult};
use crate::state::{transition, InstallationState, Trigger};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use wphub_storage::{CatalogStore, WriteOutcome};
use wphub_types::{EntityId, EntityKind, Installation, InstallationStatus, InventoryItem, SiteId};

/// Age after which an `installing` marker for an unreported entity is
/// considered abandoned.
pub const DEFAULT_INSTALLING_GRACE_SECS: i64 = 15 * 60;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Slugs that became present on the site.
    pub inserted: Vec<String>,
    /// Slugs whose version or activity changed.
    pub updated: Vec<String>,
    /// Slugs no longer reported by the site.
    pub removed: Vec<String>,
    /// Unreported slugs whose rows had no version but a leftover status
    /// (`error`, a stale `installing` marker) and were settled.
    pub reset: Vec<String>,
    pub unchanged: usize,
    /// Reported slugs the catalog does not know.
    pub untracked: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    /// Number of rows written.
    pub fn writes(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len() + self.reset.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub slug: String,
    pub error: String,
}

enum Applied {
    Unchanged,
    Written,
}

/// Reconciles inventory reports into the installation relation.
#[derive(Clone)]
pub struct Reconciler {
    catalog: CatalogStore,
    installing_grace: Duration,
}

impl Reconciler {
    pub fn new(catalog: CatalogStore) -> Self {
        Self {
            catalog,
            installing_grace: Duration::seconds(DEFAULT_INSTALLING_GRACE_SECS),
        }
    }

    pub fn with_installing_grace(mut self, grace: Duration) -> Self {
        self.installing_grace = grace;
        self
    }

    /// Applies `reported` (the full inventory of `kind` on `site_id`).
    ///
    /// Blocking; call from `spawn_blocking` in async contexts. Per-entity
    /// failures are collected in the report; only failures that prevent the
    /// pass from starting are returned as errors.
    pub fn reconcile(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        reported: &[InventoryItem],
    ) -> SyncResult<ReconcileReport> {
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        // last occurrence of a slug wins
        let mut by_slug: HashMap<&str, &InventoryItem> = HashMap::with_capacity(reported.len());
        for item in reported {
            by_slug.insert(item.slug.as_str(), item);
        }

        let slugs: Vec<&str> = by_slug.keys().copied().collect();
        let resolved = self.catalog.resolve_slugs(kind, &slugs)?;
        let rows: HashMap<EntityId, Installation> = self
            .catalog
            .installations_for_site(site_id, kind)?
            .into_iter()
            .map(|inst| (inst.entity_id, inst))
            .collect();

        let mut untracked: Vec<String> = slugs
            .iter()
            .filter(|slug| !resolved.contains_key(**slug))
            .map(|slug| slug.to_string())
            .collect();
        untracked.sort();
        report.untracked = untracked;

        let mut reported_ids: HashSet<EntityId> = HashSet::with_capacity(resolved.len());
        let mut present: Vec<(&String, &EntityId)> = resolved.iter().collect();
        present.sort();

        for (slug, entity_id) in present {
            reported_ids.insert(*entity_id);
            let Some(item) = by_slug.get(slug.as_str()) else {
                continue;
            };
            let existing = rows.get(entity_id);
            let was_present = existing.is_some_and(Installation::is_present);
            let trigger = Trigger::SyncPresent {
                version: item.version.clone(),
                is_active: item.is_active,
            };

            match self.apply(site_id, entity_id, kind, existing, &trigger, now) {
                Ok(Applied::Unchanged) => report.unchanged += 1,
                Ok(Applied::Written) if was_present => report.updated.push(slug.clone()),
                Ok(Applied::Written) => report.inserted.push(slug.clone()),
                Err(e) => {
                    warn!("reconcile {kind} {slug} on site {site_id} failed: {e}");
                    report.failures.push(ReconcileFailure {
                        slug: slug.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let gone: Vec<&Installation> = rows
            .values()
            .filter(|inst| !reported_ids.contains(&inst.entity_id) && self.settles_when_absent(inst, now))
            .collect();
        if !gone.is_empty() {
            let ids: Vec<EntityId> = gone.iter().map(|inst| inst.entity_id).collect();
            let slugs = self.catalog.slugs_for(&ids)?;
            let mut gone: Vec<(String, &Installation)> = gone
                .into_iter()
                .map(|inst| {
                    let slug = slugs
                        .get(&inst.entity_id)
                        .cloned()
                        .unwrap_or_else(|| inst.entity_id.to_string());
                    (slug, inst)
                })
                .collect();
            gone.sort_by(|a, b| a.0.cmp(&b.0));

            for (slug, inst) in gone {
                match self.apply(site_id, &inst.entity_id, kind, Some(inst), &Trigger::SyncAbsent, now) {
                    Ok(Applied::Unchanged) => report.unchanged += 1,
                    Ok(Applied::Written) if inst.is_present() => report.removed.push(slug),
                    Ok(Applied::Written) => report.reset.push(slug),
                    Err(e) => {
                        warn!("reconcile removal of {kind} {slug} on site {site_id} failed: {e}");
                        report.failures.push(ReconcileFailure {
                            slug,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if report.writes() > 0 || !report.failures.is_empty() {
            info!(
                "reconciled {kind}s on site {site_id}: {} inserted, {} updated, {} removed, {} reset, {} unchanged, {} untracked, {} failed",
                report.inserted.len(),
                report.updated.len(),
                report.removed.len(),
                report.reset.len(),
                report.unchanged,
                report.untracked.len(),
                report.failures.len()
            );
        } else {
            debug!("reconciled {kind}s on site {site_id}: no changes");
        }

        Ok(report)
    }

    /// Whether a row the report omits should go through the absent branch.
    fn settles_when_absent(&self, inst: &Installation, now: DateTime<Utc>) -> bool {
        if inst.is_present() {
            return true;
        }
        if !InstallationState::of(inst).is_unsettled_absent() {
            return false;
        }
        if inst.status == InstallationStatus::Installing {
            return inst
                .updated_at
                .is_none_or(|at| now - at >= self.installing_grace);
        }
        true
    }

    /// Drives one row through `trigger`, writing only if the state changes.
    fn apply(
        &self,
        site_id: &SiteId,
        entity_id: &EntityId,
        kind: EntityKind,
        existing: Option<&Installation>,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> SyncResult<Applied> {
        let mut current = existing.cloned();

        for attempt in 0..2 {
            let state = current
                .as_ref()
                .map(InstallationState::of)
                .unwrap_or_else(|| InstallationState::absent(false));
            let next = transition(&state, trigger)?;
            if current.is_some() && !next.differs_from(&state) {
                return Ok(Applied::Unchanged);
            }

            let mut row = current.clone().unwrap_or_else(|| Installation {
                site_id: *site_id,
                entity_id: *entity_id,
                kind,
                status: next.status,
                installed_version: None,
                is_active: false,
                is_enabled: false,
                last_sync: None,
                row_version: 0,
                updated_at: None,
            });
            next.write_into(&mut row);
            row.last_sync = Some(now);

            let expected = current.as_ref().map(|inst| inst.row_version);
            match self.catalog.save_installation(&row, expected)? {
                WriteOutcome::Written { .. } => return Ok(Applied::Written),
                WriteOutcome::Conflict => {
                    debug!(
                        "row for entity {entity_id} on site {site_id} changed concurrently (attempt {})",
                        attempt + 1
                    );
                    current = self.catalog.get_installation(site_id, entity_id)?;
                }
            }
        }

        Err(SyncError::Conflict(format!(
            "row for entity {entity_id} on site {site_id} kept changing during reconciliation"
        )))
    }
}
