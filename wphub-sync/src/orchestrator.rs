//! Action orchestrator: runs plugin/theme actions against a site and keeps
//! the installation relation in step with what the connector acknowledged.
//!
//! The orchestrator owns all I/O:
//! - validates the site, entity and (kind, action) pair
//! - calls the connector
//! - drives the installation row through the state machine
//! - records an activity entry (best-effort)
//!
//! A transport or HTTP failure from the connector is returned as-is and
//! leaves the store untouched. Storage work runs on the blocking pool.

use crate::activity::{ActivityEntry, ActivityLog, ActivityOutcome, TracingActivityLog};
use crate::error::{SyncError, SyncResult};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::state::{transition, InstallationState, Trigger};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wphub_connector::{ActionAck, Connector, ConnectorAction, ConnectorResult};
use wphub_storage::{Database, WriteOutcome};
use wphub_types::{
    CatalogEntity, EntityId, EntityKind, Installation, InstallationStatus, Site, SiteId,
};

/// How a request names its plugin or theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(EntityId),
    Slug(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{id}"),
            EntityRef::Slug(slug) => write!(f, "{slug}"),
        }
    }
}

/// Result of a successful action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub site_id: SiteId,
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub slug: String,
    /// The connector action that ran (for `toggle`, the one it chose).
    pub action: String,
    pub message: String,
    /// The installation row after the action, if one exists.
    pub installation: Option<Installation>,
    /// Another control-plane write touched the row while the action was in
    /// flight; the row was re-reconciled from the site's inventory.
    pub raced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorUpdateOutcome {
    pub site_id: SiteId,
    pub message: String,
    pub connector_version: String,
}

/// Per-kind result of a site sync.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KindSync {
    Reconciled { report: ReconcileReport },
    /// The connector lacks the listing endpoint; it needs updating.
    PendingConnectorUpdate { message: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteSyncOutcome {
    pub site_id: SiteId,
    pub wp_version: Option<String>,
    pub connector_version: Option<String>,
    pub plugins: KindSync,
    pub themes: KindSync,
}

struct Target {
    site: Site,
    entity: CatalogEntity,
    row: Option<Installation>,
}

struct Persisted {
    row: Option<Installation>,
    raced: bool,
}

/// Coordinates connector calls with installation state.
pub struct ActionOrchestrator {
    connector: Arc<dyn Connector>,
    db: Database,
    activity: Arc<dyn ActivityLog>,
}

impl ActionOrchestrator {
    /// Creates an orchestrator that logs activity through `tracing`.
    pub fn new(connector: Arc<dyn Connector>, db: Database) -> Self {
        Self::with_activity_log(connector, db, Arc::new(TracingActivityLog))
    }

    pub fn with_activity_log(
        connector: Arc<dyn Connector>,
        db: Database,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            connector,
            db,
            activity,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ── Simple actions ──

    pub async fn install(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
        file_url: Option<&str>,
    ) -> SyncResult<ActionOutcome> {
        let target = self.load_target(site_id, kind, entity).await?;
        ensure_supported(kind, ConnectorAction::Install)?;

        let marker = self.mark_installing(&target).await?;
        let result = self
            .connector
            .perform(&target.site, kind, ConnectorAction::Install, &target.entity.slug, file_url)
            .await;

        if result.is_err() {
            if let Some(marker) = &marker {
                self.clear_marker(&target, marker).await;
            }
        }
        let expected = marker.or_else(|| target.row.clone());
        self.settle(&target, ConnectorAction::Install, expected, result, None).await
    }

    pub async fn uninstall(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
    ) -> SyncResult<ActionOutcome> {
        self.simple(site_id, kind, entity, ConnectorAction::Uninstall).await
    }

    pub async fn activate(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
    ) -> SyncResult<ActionOutcome> {
        self.simple(site_id, kind, entity, ConnectorAction::Activate).await
    }

    pub async fn deactivate(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
    ) -> SyncResult<ActionOutcome> {
        self.simple(site_id, kind, entity, ConnectorAction::Deactivate).await
    }

    async fn simple(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
        action: ConnectorAction,
    ) -> SyncResult<ActionOutcome> {
        let target = self.load_target(site_id, kind, entity).await?;
        ensure_supported(kind, action)?;

        let result = self
            .connector
            .perform(&target.site, kind, action, &target.entity.slug, None)
            .await;
        let expected = target.row.clone();
        self.settle(&target, action, expected, result, None).await
    }

    // ── Toggle ──

    /// Activates the entity if the site reports it inactive, deactivates it
    /// if the site reports it active.
    ///
    /// The row's `row_version` is captured before the inventory is read; the
    /// result is written only if no other control-plane write happened in
    /// between. Otherwise the site's inventory is re-listed and reconciled
    /// and the outcome is flagged `raced`. A change made directly on the site
    /// between the listing and the action is not detectable.
    pub async fn toggle(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
    ) -> SyncResult<ActionOutcome> {
        let target = self.load_target(site_id, kind, entity).await?;

        let inventory = self.connector.list_installed(&target.site, kind).await?;
        let item = inventory
            .iter()
            .rev()
            .find(|item| item.slug == target.entity.slug)
            .ok_or_else(|| {
                SyncError::NotFound(format!(
                    "{kind} {} is not installed on site {}",
                    target.entity.slug, target.site.id
                ))
            })?;

        let action = if item.is_active {
            ConnectorAction::Deactivate
        } else {
            ConnectorAction::Activate
        };
        ensure_supported(kind, action)?;
        debug!(
            "toggle {kind} {} on site {}: reported active={}, choosing {action}",
            target.entity.slug, target.site.id, item.is_active
        );

        let result = self
            .connector
            .perform(&target.site, kind, action, &target.entity.slug, None)
            .await;
        let expected = target.row.clone();
        self.settle(&target, action, expected, result, Some(item.version.clone()))
            .await
    }

    // ── Policy ──

    /// Opts an entity in or out for a site. Never calls the connector.
    pub async fn enable_for_site(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
        enabled: bool,
    ) -> SyncResult<Installation> {
        let target = self.load_target(site_id, kind, entity).await?;
        let db = self.db.clone();
        let site_id = target.site.id;
        let entity_id = target.entity.id;
        let mut current = target.row.clone();

        let row = blocking(move || {
            let catalog = db.catalog();
            for _ in 0..2 {
                let state = current
                    .as_ref()
                    .map(InstallationState::of)
                    .unwrap_or_else(|| InstallationState::absent(false));
                let next = transition(&state, &Trigger::SetEnabled(enabled))?;
                if let Some(row) = &current {
                    if !next.differs_from(&state) {
                        return Ok(row.clone());
                    }
                }

                let mut row = current
                    .clone()
                    .unwrap_or_else(|| new_row(site_id, entity_id, kind));
                next.write_into(&mut row);
                match catalog.save_installation(&row, current.as_ref().map(|r| r.row_version))? {
                    WriteOutcome::Written { row_version } => {
                        row.row_version = row_version;
                        return Ok(row);
                    }
                    WriteOutcome::Conflict => {
                        current = catalog.get_installation(&site_id, &entity_id)?;
                    }
                }
            }
            Err(SyncError::Conflict(format!(
                "installation of {kind} {entity_id} on site {site_id} kept changing"
            )))
        })
        .await?;

        info!(
            "{} {kind} {} for site {}",
            if enabled { "enabled" } else { "disabled" },
            target.entity.slug,
            target.site.id
        );
        self.record(
            ActivityEntry::new(
                target.site.id,
                if enabled { "enable" } else { "disable" },
                ActivityOutcome::Succeeded,
            )
            .with_entity(kind, target.entity.id),
        )
        .await;

        Ok(row)
    }

    // ── Connector maintenance ──

    /// Asks the site's connector to update itself and records the new
    /// connector version on success.
    pub async fn update_connector(
        &self,
        site_id: &SiteId,
        file_url: &str,
        new_version: &str,
    ) -> SyncResult<ConnectorUpdateOutcome> {
        if file_url.trim().is_empty() {
            return Err(SyncError::Validation("file_url is required".into()));
        }
        if new_version.trim().is_empty() {
            return Err(SyncError::Validation("new_version is required".into()));
        }

        let site = self.load_site(site_id).await?;
        let ack = match self.connector.update_self(&site, file_url, new_version).await {
            Ok(ack) => ack,
            Err(e) => {
                self.record(
                    ActivityEntry::new(site.id, "update_connector", ActivityOutcome::Failed)
                        .with_detail(e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };

        if !ack.success {
            self.record(
                ActivityEntry::new(site.id, "update_connector", ActivityOutcome::Rejected)
                    .with_detail(ack.message.clone()),
            )
            .await;
            return Err(SyncError::ActionRejected {
                action: "update_connector".into(),
                message: ack.message,
            });
        }

        let db = self.db.clone();
        let id = site.id;
        let version = new_version.to_string();
        blocking(move || Ok(db.sites().set_connector_version(&id, &version)?)).await?;

        info!("connector on site {} updated to {new_version}", site.id);
        self.record(
            ActivityEntry::new(site.id, "update_connector", ActivityOutcome::Succeeded)
                .with_detail(format!("version {new_version}")),
        )
        .await;

        Ok(ConnectorUpdateOutcome {
            site_id: site.id,
            message: ack.message,
            connector_version: new_version.to_string(),
        })
    }

    // ── Sync ──

    /// Pings the site, then lists and reconciles its plugins and themes.
    pub async fn sync_site(&self, site_id: &SiteId) -> SyncResult<SiteSyncOutcome> {
        let site = self.load_site(site_id).await?;
        let now = Utc::now();

        let (wp_version, connector_version) = match self.connector.ping(&site).await {
            Ok(report) => (report.wp_version, report.connector_version),
            // the site answered; only the ping endpoint is missing
            Err(e) if e.is_endpoint_missing() => (None, None),
            Err(e) => {
                warn!("site {} unreachable: {e}", site.id);
                let db = self.db.clone();
                let id = site.id;
                blocking(move || Ok(db.sites().mark_unreachable(&id)?)).await?;
                self.record(
                    ActivityEntry::new(site.id, "sync", ActivityOutcome::Failed)
                        .with_detail(e.to_string()),
                )
                .await;
                return Err(e.into());
            }
        };

        {
            let db = self.db.clone();
            let id = site.id;
            let wp = wp_version.clone();
            let cv = connector_version.clone();
            blocking(move || {
                Ok(db
                    .sites()
                    .mark_reachable(&id, now, wp.as_deref(), cv.as_deref())?)
            })
            .await?;
        }

        let plugins = self.sync_kind(&site, EntityKind::Plugin).await;
        let themes = self.sync_kind(&site, EntityKind::Theme).await;

        Ok(SiteSyncOutcome {
            site_id: site.id,
            wp_version,
            connector_version,
            plugins,
            themes,
        })
    }

    async fn sync_kind(&self, site: &Site, kind: EntityKind) -> KindSync {
        match self.list_and_reconcile(site, kind).await {
            Ok(report) => KindSync::Reconciled { report },
            Err(SyncError::Connector(e)) if e.is_endpoint_missing() => {
                warn!("site {} connector cannot list {kind}s; update pending: {e}", site.id);
                KindSync::PendingConnectorUpdate {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                warn!("{kind} sync for site {} failed: {e}", site.id);
                KindSync::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn list_and_reconcile(&self, site: &Site, kind: EntityKind) -> SyncResult<ReconcileReport> {
        let items = self.connector.list_installed(site, kind).await?;
        let reconciler = Reconciler::new(self.db.catalog());
        let site_id = site.id;
        blocking(move || reconciler.reconcile(&site_id, kind, &items)).await
    }

    // ── Internals ──

    /// Applies a connector result to the row and records the activity.
    async fn settle(
        &self,
        target: &Target,
        action: ConnectorAction,
        expected: Option<Installation>,
        result: ConnectorResult<ActionAck>,
        reported_version: Option<String>,
    ) -> SyncResult<ActionOutcome> {
        let kind = target.entity.kind;
        let entry = ActivityEntry::new(target.site.id, action.as_str(), ActivityOutcome::Succeeded)
            .with_entity(kind, target.entity.id);

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                warn!(
                    "{action} {kind} {} on site {} failed: {e}",
                    target.entity.slug, target.site.id
                );
                self.record(ActivityEntry {
                    outcome: ActivityOutcome::Failed,
                    detail: e.to_string(),
                    ..entry
                })
                .await;
                return Err(e.into());
            }
        };

        if !ack.success {
            warn!(
                "{action} {kind} {} on site {} rejected: {}",
                target.entity.slug, target.site.id, ack.message
            );
            self.persist(target, expected, Trigger::ActionFailed).await?;
            self.record(ActivityEntry {
                outcome: ActivityOutcome::Rejected,
                detail: ack.message.clone(),
                ..entry
            })
            .await;
            return Err(SyncError::ActionRejected {
                action: action.as_str().to_string(),
                message: ack.message,
            });
        }

        let trigger = Trigger::ActionSucceeded {
            action,
            version: ack.version.clone().or(reported_version),
        };
        let mut persisted = self.persist(target, expected, trigger).await?;
        if action != ConnectorAction::Uninstall
            && !persisted.raced
            && !persisted.row.as_ref().is_some_and(Installation::is_present)
        {
            persisted.row = self.refresh_from_inventory(target).await?;
        }

        if kind == EntityKind::Theme && action == ConnectorAction::Activate {
            self.demote_other_themes(&target.site.id, &target.entity.id).await;
        }

        info!(
            "{action} {kind} {} on site {}: {}",
            target.entity.slug, target.site.id, ack.message
        );
        self.record(ActivityEntry {
            detail: ack.message.clone(),
            ..entry
        })
        .await;

        Ok(ActionOutcome {
            site_id: target.site.id,
            entity_id: target.entity.id,
            kind,
            slug: target.entity.slug.clone(),
            action: action.as_str().to_string(),
            message: ack.message,
            installation: persisted.row,
            raced: persisted.raced,
        })
    }

    /// Writes the state `trigger` produces, conditional on `expected`'s
    /// `row_version`. On conflict the site's inventory wins.
    async fn persist(
        &self,
        target: &Target,
        expected: Option<Installation>,
        trigger: Trigger,
    ) -> SyncResult<Persisted> {
        let db = self.db.clone();
        let site_id = target.site.id;
        let entity_id = target.entity.id;
        let kind = target.entity.kind;

        let written = blocking(move || {
            let state = expected
                .as_ref()
                .map(InstallationState::of)
                .unwrap_or_else(|| InstallationState::absent(false));
            let next = transition(&state, &trigger)?;
            if let Some(row) = &expected {
                if !next.differs_from(&state) {
                    return Ok(Some(row.clone()));
                }
            }

            let mut row = expected
                .clone()
                .unwrap_or_else(|| new_row(site_id, entity_id, kind));
            next.write_into(&mut row);
            match db
                .catalog()
                .save_installation(&row, expected.as_ref().map(|r| r.row_version))?
            {
                WriteOutcome::Written { row_version } => {
                    row.row_version = row_version;
                    Ok(Some(row))
                }
                WriteOutcome::Conflict => Ok(None),
            }
        })
        .await?;

        if let Some(row) = written {
            return Ok(Persisted {
                row: Some(row),
                raced: false,
            });
        }

        warn!(
            "installation of {kind} {} on site {} changed during the action; re-reconciling",
            target.entity.slug, site_id
        );
        if let Err(e) = self.list_and_reconcile(&target.site, kind).await {
            warn!("re-reconcile of {kind}s on site {site_id} failed: {e}");
        }

        let db = self.db.clone();
        let row = blocking(move || Ok(db.catalog().get_installation(&site_id, &entity_id)?)).await?;
        Ok(Persisted { row, raced: true })
    }

    /// Re-lists the site's inventory after an acknowledged action that left
    /// the installed version unknown, and returns the reconciled row.
    async fn refresh_from_inventory(&self, target: &Target) -> SyncResult<Option<Installation>> {
        let kind = target.entity.kind;
        debug!(
            "{kind} {} on site {} acknowledged without a version; re-reading inventory",
            target.entity.slug, target.site.id
        );
        if let Err(e) = self.list_and_reconcile(&target.site, kind).await {
            warn!(
                "could not confirm {kind} {} on site {}: {e}",
                target.entity.slug, target.site.id
            );
        }

        let db = self.db.clone();
        let site_id = target.site.id;
        let entity_id = target.entity.id;
        blocking(move || Ok(db.catalog().get_installation(&site_id, &entity_id)?)).await
    }

    /// Writes the `installing` marker for a not-yet-present entity. Returns
    /// the marker row, or `None` when the entity is already present (a
    /// reinstall or upgrade).
    async fn mark_installing(&self, target: &Target) -> SyncResult<Option<Installation>> {
        if let Some(row) = &target.row {
            if row.is_present() {
                return Ok(None);
            }
            if row.status == InstallationStatus::Installing {
                return Err(SyncError::Conflict(format!(
                    "{} {} is already being installed on site {}",
                    target.entity.kind, target.entity.slug, target.site.id
                )));
            }
        }

        let db = self.db.clone();
        let current = target.row.clone();
        let site_id = target.site.id;
        let entity_id = target.entity.id;
        let kind = target.entity.kind;

        blocking(move || {
            let state = current
                .as_ref()
                .map(InstallationState::of)
                .unwrap_or_else(|| InstallationState::absent(false));
            let next = transition(&state, &Trigger::InstallStarted)?;
            let mut row = current
                .clone()
                .unwrap_or_else(|| new_row(site_id, entity_id, kind));
            next.write_into(&mut row);
            match db
                .catalog()
                .save_installation(&row, current.as_ref().map(|r| r.row_version))?
            {
                WriteOutcome::Written { row_version } => {
                    row.row_version = row_version;
                    Ok(Some(row))
                }
                WriteOutcome::Conflict => Err(SyncError::Conflict(format!(
                    "installation of {kind} {entity_id} on site {site_id} changed before install"
                ))),
            }
        })
        .await
    }

    /// Undoes an `installing` marker after the connector call failed.
    async fn clear_marker(&self, target: &Target, marker: &Installation) {
        let db = self.db.clone();
        let previous = target.row.clone();
        let marker = marker.clone();

        let result = blocking(move || {
            let catalog = db.catalog();
            let outcome = match previous {
                Some(previous) => catalog.save_installation(&previous, Some(marker.row_version))?,
                None => catalog.delete_installation(&marker.site_id, &marker.entity_id, marker.row_version)?,
            };
            Ok(outcome)
        })
        .await;

        match result {
            Ok(WriteOutcome::Written { .. }) => {}
            Ok(WriteOutcome::Conflict) => debug!(
                "installing marker for {} on site {} already replaced",
                target.entity.slug, target.site.id
            ),
            Err(e) => warn!(
                "failed to clear installing marker for {} on site {}: {e}",
                target.entity.slug, target.site.id
            ),
        }
    }

    /// WordPress keeps one active theme; after an activation every other
    /// theme row of the site is marked inactive.
    async fn demote_other_themes(&self, site_id: &SiteId, keep: &EntityId) {
        let db = self.db.clone();
        let site_id = *site_id;
        let keep = *keep;

        let result = blocking(move || {
            let catalog = db.catalog();
            let mut demoted = 0usize;
            for row in catalog.installations_for_site(&site_id, EntityKind::Theme)? {
                if row.entity_id == keep || !row.is_active {
                    continue;
                }
                let state = InstallationState::of(&row);
                let next = transition(
                    &state,
                    &Trigger::ActionSucceeded {
                        action: ConnectorAction::Deactivate,
                        version: None,
                    },
                )?;
                let mut updated = row.clone();
                next.write_into(&mut updated);
                match catalog.save_installation(&updated, Some(row.row_version))? {
                    WriteOutcome::Written { .. } => demoted += 1,
                    WriteOutcome::Conflict => {
                        debug!("theme row {} on site {site_id} changed; not demoted", row.entity_id)
                    }
                }
            }
            Ok(demoted)
        })
        .await;

        match result {
            Ok(0) => {}
            Ok(n) => debug!("demoted {n} previously active theme(s) on site {site_id}"),
            Err(e) => warn!("failed to demote other themes on site {site_id}: {e}"),
        }
    }

    async fn load_site(&self, site_id: &SiteId) -> SyncResult<Site> {
        let db = self.db.clone();
        let site_id = *site_id;
        blocking(move || {
            db.sites()
                .get_site(&site_id)?
                .ok_or_else(|| SyncError::NotFound(format!("site {site_id}")))
        })
        .await
    }

    async fn load_target(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
        entity: &EntityRef,
    ) -> SyncResult<Target> {
        let db = self.db.clone();
        let site_id = *site_id;
        let entity = entity.clone();

        blocking(move || {
            let site = db
                .sites()
                .get_site(&site_id)?
                .ok_or_else(|| SyncError::NotFound(format!("site {site_id}")))?;
            let catalog = db.catalog();
            let found = match &entity {
                EntityRef::Id(id) => catalog.get_entity(id)?.filter(|e| e.kind == kind),
                EntityRef::Slug(slug) => catalog.find_by_slug(kind, slug)?,
            };
            let entity = found.ok_or_else(|| SyncError::NotFound(format!("{kind} {entity}")))?;
            let row = catalog.get_installation(&site.id, &entity.id)?;
            Ok(Target { site, entity, row })
        })
        .await
    }

    async fn record(&self, entry: ActivityEntry) {
        if let Err(e) = self.activity.record(entry).await {
            warn!("failed to record activity: {e}");
        }
    }
}

fn ensure_supported(kind: EntityKind, action: ConnectorAction) -> SyncResult<()> {
    if action.endpoint(kind).is_none() {
        return Err(SyncError::Validation(format!(
            "{action} is not supported for {kind}s"
        )));
    }
    Ok(())
}

fn new_row(site_id: SiteId, entity_id: EntityId, kind: EntityKind) -> Installation {
    Installation {
        site_id,
        entity_id,
        kind,
        status: InstallationStatus::Unavailable,
        installed_version: None,
        is_active: false,
        is_enabled: false,
        last_sync: None,
        row_version: 0,
        updated_at: None,
    }
}

/// Runs blocking storage work on the blocking pool.
async fn blocking<T, F>(f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Join(e.to_string()))?
}
