mod support;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::*;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wphub_connector::{ConnectorAction, ConnectorClient, ConnectorConfig, ConnectorError};
use wphub_storage::Database;
use wphub_sync::{
    ActionOrchestrator, ActivityEntry, ActivityLog, ActivityOutcome, EntityRef, KindSync,
    MemoryActivityLog, Reconciler, SyncError, SyncResult,
};
use wphub_types::{EntityKind, InstallationStatus, InventoryItem, SiteStatus};

fn http_orchestrator(db: &Database) -> ActionOrchestrator {
    let client = ConnectorClient::new(ConnectorConfig::fast()).unwrap();
    ActionOrchestrator::new(Arc::new(client), db.clone())
}

fn slug(s: &str) -> EntityRef {
    EntityRef::Slug(s.to_string())
}

async fn mount_plugins(server: &MockServer, plugins: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/getInstalledPlugins"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "success": true, "plugins": plugins })),
        )
        .mount(server)
        .await;
}

// ── Toggle ───────────────────────────────────────────────────────

#[tokio::test]
async fn toggle_activates_inactive_plugin() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");
    seed_installation(&db, &site, &plugin, "5.3", false);

    mount_plugins(
        &server,
        serde_json::json!([{ "slug": "akismet", "version": "5.3", "is_active": false }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .and(body_partial_json(serde_json::json!({ "plugin_slug": "akismet" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "success": true, "message": "activated" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/deactivatePlugin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = http_orchestrator(&db)
        .toggle(&site.id, EntityKind::Plugin, &slug("akismet"))
        .await
        .unwrap();

    assert_eq!(outcome.action, "activate");
    assert!(!outcome.raced);
    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Active);
    assert!(row.is_active);
    assert_eq!(row.installed_version.as_deref(), Some("5.3"));
}

#[tokio::test]
async fn toggle_deactivates_active_plugin() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");
    seed_installation(&db, &site, &plugin, "5.3", true);

    mount_plugins(
        &server,
        serde_json::json!([{ "slug": "akismet", "version": "5.3", "is_active": true }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/deactivatePlugin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "success": true, "message": "deactivated" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = http_orchestrator(&db)
        .toggle(&site.id, EntityKind::Plugin, &slug("akismet"))
        .await
        .unwrap();

    assert_eq!(outcome.action, "deactivate");
    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Inactive);
    assert!(!row.is_active);
}

#[tokio::test]
async fn toggle_of_unlisted_slug_is_not_found() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    add_entity(&db, EntityKind::Plugin, "akismet");
    let connector = Arc::new(ScriptedConnector::default());
    let orchestrator = ActionOrchestrator::new(connector.clone(), db.clone());

    let err = orchestrator
        .toggle(&site.id, EntityKind::Plugin, &slug("akismet"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound(_)));
    assert!(connector.performed().is_empty());
}

#[tokio::test]
async fn toggle_of_active_theme_is_unsupported() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    add_entity(&db, EntityKind::Theme, "twentytwenty");
    let connector = Arc::new(
        ScriptedConnector::default().with_inventory(
            EntityKind::Theme,
            vec![InventoryItem::new("twentytwenty", "2.0", true)],
        ),
    );
    let orchestrator = ActionOrchestrator::new(connector.clone(), db.clone());

    let err = orchestrator
        .toggle(&site.id, EntityKind::Theme, &slug("twentytwenty"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert!(connector.performed().is_empty());
}

#[tokio::test]
async fn toggle_race_with_local_write_rereconciles() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    seed_installation(&db, &site, &plugin, "1.0", false);

    let connector = Arc::new(
        ScriptedConnector::default()
            .with_inventory(EntityKind::Plugin, vec![InventoryItem::new("p", "1.0", false)]),
    );

    // another control-plane write lands while the activate call is in flight
    let hook_db = db.clone();
    let hook_connector = connector.clone();
    let site_id = site.id;
    let entity_id = plugin.id;
    connector.before_perform(move || {
        let catalog = hook_db.catalog();
        let mut row = catalog.get_installation(&site_id, &entity_id).unwrap().unwrap();
        let expected = row.row_version;
        row.is_enabled = true;
        catalog.save_installation(&row, Some(expected)).unwrap();
        hook_connector.set_inventory(EntityKind::Plugin, vec![InventoryItem::new("p", "1.0", true)]);
    });

    let orchestrator = ActionOrchestrator::new(connector.clone(), db.clone());
    let outcome = orchestrator
        .toggle(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();

    assert!(outcome.raced);
    assert_eq!(outcome.action, "activate");
    assert_eq!(connector.list_calls(), 2);

    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Active);
    assert!(row.is_enabled);
    assert_eq!(outcome.installation, Some(row));
}

// ── Connector failures ───────────────────────────────────────────

#[tokio::test]
async fn endpoint_missing_is_distinct_from_server_error() {
    let missing = MockServer::start().await;
    let broken = MockServer::start().await;
    let db = setup_db();
    let site_missing = add_site(&db, "old", &missing.uri());
    let site_broken = add_site(&db, "broken", &broken.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .respond_with(ResponseTemplate::new(404).set_body_string("rest_no_route"))
        .mount(&missing)
        .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .respond_with(ResponseTemplate::new(500).set_body_string("fatal error"))
        .mount(&broken)
        .await;

    let orchestrator = http_orchestrator(&db);
    let err_missing = orchestrator
        .activate(&site_missing.id, EntityKind::Plugin, &EntityRef::Id(plugin.id))
        .await
        .unwrap_err();
    let err_broken = orchestrator
        .activate(&site_broken.id, EntityKind::Plugin, &EntityRef::Id(plugin.id))
        .await
        .unwrap_err();

    match err_missing {
        SyncError::Connector(e) => {
            assert!(e.is_endpoint_missing());
            assert_eq!(e.upstream_status(), Some(404));
        }
        other => panic!("expected connector error, got {other:?}"),
    }
    match err_broken {
        SyncError::Connector(ConnectorError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "fatal error");
        }
        other => panic!("expected connector status error, got {other:?}"),
    }
}

#[tokio::test]
async fn connector_failure_writes_nothing() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");
    let before = seed_installation(&db, &site, &plugin, "5.3", false);

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let writes = db.catalog().installation_writes();
    let err = http_orchestrator(&db)
        .activate(&site.id, EntityKind::Plugin, &slug("akismet"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connector(_)));
    assert_eq!(db.catalog().installation_writes(), writes);
    assert_eq!(installation(&db, &site, &plugin).unwrap(), before);
}

#[tokio::test]
async fn acknowledged_failure_moves_row_to_error() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");
    seed_installation(&db, &site, &plugin, "5.3", false);

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activatePlugin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "message": "Plugin file does not exist."
        })))
        .mount(&server)
        .await;

    let err = http_orchestrator(&db)
        .activate(&site.id, EntityKind::Plugin, &slug("akismet"))
        .await
        .unwrap_err();

    match err {
        SyncError::ActionRejected { action, message } => {
            assert_eq!(action, "activate");
            assert_eq!(message, "Plugin file does not exist.");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Error);
    assert_eq!(row.installed_version, None);
    assert!(!row.is_active);
}

// ── Simple actions ───────────────────────────────────────────────

#[tokio::test]
async fn install_records_returned_version() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());
    let mut ok = ack(true, "installed");
    ok.version = Some("2.0".into());
    connector.push_ack(Ok(ok));

    let outcome = ActionOrchestrator::new(connector.clone(), db.clone())
        .install(&site.id, EntityKind::Plugin, &slug("p"), Some("https://pkg.example/p.zip"))
        .await
        .unwrap();

    assert_eq!(outcome.message, "installed");
    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Active);
    assert_eq!(row.installed_version.as_deref(), Some("2.0"));
    assert_eq!(
        connector.performed(),
        vec![(EntityKind::Plugin, ConnectorAction::Install, "p".to_string())]
    );
}

#[tokio::test]
async fn install_marks_row_installing_while_in_flight() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());

    let seen = Arc::new(std::sync::Mutex::new(None));
    let hook_seen = seen.clone();
    let hook_db = db.clone();
    let (site_id, entity_id) = (site.id, plugin.id);
    connector.before_perform(move || {
        let row = hook_db.catalog().get_installation(&site_id, &entity_id).unwrap();
        *hook_seen.lock().unwrap() = row.map(|r| r.status);
    });

    ActionOrchestrator::new(connector, db.clone())
        .install(&site.id, EntityKind::Plugin, &slug("p"), None)
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), Some(InstallationStatus::Installing));
}

#[tokio::test]
async fn failed_install_call_clears_marker() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());
    connector.push_ack(Err(ConnectorError::Unreachable("connection refused".into())));

    let err = ActionOrchestrator::new(connector, db.clone())
        .install(&site.id, EntityKind::Plugin, &slug("p"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connector(ConnectorError::Unreachable(_))));
    assert!(installation(&db, &site, &plugin).is_none());
}

#[tokio::test]
async fn install_while_installing_conflicts() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());

    let mut marker = seed_installation(&db, &site, &plugin, "1.0", false);
    let expected = marker.row_version;
    marker.installed_version = None;
    marker.status = InstallationStatus::Installing;
    db.catalog().save_installation(&marker, Some(expected)).unwrap();

    let err = ActionOrchestrator::new(connector.clone(), db.clone())
        .install(&site.id, EntityKind::Plugin, &slug("p"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Conflict(_)));
    assert!(connector.performed().is_empty());
}

#[tokio::test]
async fn versionless_ack_on_unsynced_row_reads_inventory() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(
        ScriptedConnector::default()
            .with_inventory(EntityKind::Plugin, vec![InventoryItem::new("p", "3.1", true)]),
    );

    let outcome = ActionOrchestrator::new(connector.clone(), db.clone())
        .activate(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();

    assert_eq!(connector.list_calls(), 1);
    assert!(!outcome.raced);
    let row = outcome.installation.unwrap();
    assert_eq!(row.status, InstallationStatus::Active);
    assert_eq!(row.installed_version.as_deref(), Some("3.1"));
    assert!(row.is_active);

    let entity = db.catalog().get_entity(&plugin.id).unwrap().unwrap();
    assert_eq!(entity.installed_on.len(), 1);
    assert_eq!(entity.installed_on[0].version, "3.1");
}

#[tokio::test]
async fn versionless_ack_never_claims_presence() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());

    ActionOrchestrator::new(connector, db.clone())
        .activate(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();

    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Unavailable);
    assert_eq!(row.installed_version, None);
    assert!(!row.is_active);
    assert!(db.catalog().get_entity(&plugin.id).unwrap().unwrap().installed_on.is_empty());

    let report = Reconciler::new(db.catalog())
        .reconcile(&site.id, EntityKind::Plugin, &[])
        .unwrap();
    assert_eq!(report.writes(), 0);
    assert_eq!(installation(&db, &site, &plugin).unwrap(), row);
}

#[tokio::test]
async fn install_is_possible_again_after_stale_marker_is_settled() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let row = seed_installation(&db, &site, &plugin, "1.0", false);
    force_state(&db, &row, InstallationStatus::Installing, None, false);

    Reconciler::new(db.catalog())
        .with_installing_grace(chrono::Duration::zero())
        .reconcile(&site.id, EntityKind::Plugin, &[])
        .unwrap();

    let connector = Arc::new(ScriptedConnector::default());
    let mut ok = ack(true, "installed");
    ok.version = Some("1.1".into());
    connector.push_ack(Ok(ok));

    ActionOrchestrator::new(connector.clone(), db.clone())
        .install(&site.id, EntityKind::Plugin, &slug("p"), None)
        .await
        .unwrap();

    assert_eq!(connector.performed().len(), 1);
    assert_eq!(
        installation(&db, &site, &plugin).unwrap().installed_version.as_deref(),
        Some("1.1")
    );
}

#[tokio::test]
async fn uninstall_marks_available_and_enabled() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    seed_installation(&db, &site, &plugin, "1.0", true);
    let connector = Arc::new(ScriptedConnector::default());

    ActionOrchestrator::new(connector, db.clone())
        .uninstall(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();

    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Available);
    assert_eq!(row.installed_version, None);
    assert!(row.is_enabled);
    assert!(db.catalog().get_entity(&plugin.id).unwrap().unwrap().installed_on.is_empty());
}

#[tokio::test]
async fn theme_activation_demotes_previous_theme() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let old = add_entity(&db, EntityKind::Theme, "twentytwenty");
    let new = add_entity(&db, EntityKind::Theme, "astra");
    seed_installation(&db, &site, &old, "2.0", true);
    seed_installation(&db, &site, &new, "4.1", false);

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/activateTheme"))
        .and(body_partial_json(serde_json::json!({ "theme_slug": "astra" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "message": "Theme activated",
            "active_theme": "astra"
        })))
        .expect(1)
        .mount(&server)
        .await;

    http_orchestrator(&db)
        .activate(&site.id, EntityKind::Theme, &slug("astra"))
        .await
        .unwrap();

    let new_row = installation(&db, &site, &new).unwrap();
    assert_eq!(new_row.status, InstallationStatus::Active);
    let old_row = installation(&db, &site, &old).unwrap();
    assert_eq!(old_row.status, InstallationStatus::Inactive);
    assert!(!old_row.is_active);
    assert_eq!(old_row.installed_version.as_deref(), Some("2.0"));
}

#[tokio::test]
async fn theme_deactivate_is_rejected_before_any_call() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    add_entity(&db, EntityKind::Theme, "astra");
    let connector = Arc::new(ScriptedConnector::default());

    let err = ActionOrchestrator::new(connector.clone(), db.clone())
        .deactivate(&site.id, EntityKind::Theme, &slug("astra"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert!(connector.performed().is_empty());
}

#[tokio::test]
async fn unknown_site_and_entity_are_not_found() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let theme = add_entity(&db, EntityKind::Theme, "astra");
    let connector = Arc::new(ScriptedConnector::default());
    let orchestrator = ActionOrchestrator::new(connector.clone(), db.clone());

    let err = orchestrator
        .activate(&wphub_types::SiteId::new(), EntityKind::Plugin, &slug("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    let err = orchestrator
        .activate(&site.id, EntityKind::Plugin, &slug("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    // a theme id used on the plugin routes
    let err = orchestrator
        .activate(&site.id, EntityKind::Plugin, &EntityRef::Id(theme.id))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    assert!(connector.performed().is_empty());
}

// ── Enable / disable ─────────────────────────────────────────────

#[tokio::test]
async fn enable_for_site_never_calls_connector() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    let connector = Arc::new(ScriptedConnector::default());
    let orchestrator = ActionOrchestrator::new(connector.clone(), db.clone());

    let row = orchestrator
        .enable_for_site(&site.id, EntityKind::Plugin, &slug("p"), true)
        .await
        .unwrap();
    assert!(row.is_enabled);
    assert_eq!(row.status, InstallationStatus::Available);
    assert_eq!(installation(&db, &site, &plugin).unwrap(), row);

    let row = orchestrator
        .enable_for_site(&site.id, EntityKind::Plugin, &slug("p"), false)
        .await
        .unwrap();
    assert_eq!(row.status, InstallationStatus::Unavailable);

    assert!(connector.performed().is_empty());
    assert_eq!(connector.list_calls(), 0);
}

#[tokio::test]
async fn enable_on_installed_entity_keeps_status() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    seed_installation(&db, &site, &plugin, "1.0", true);
    let orchestrator = ActionOrchestrator::new(Arc::new(ScriptedConnector::default()), db.clone());

    let row = orchestrator
        .enable_for_site(&site.id, EntityKind::Plugin, &slug("p"), true)
        .await
        .unwrap();

    assert_eq!(row.status, InstallationStatus::Active);
    assert_eq!(row.installed_version.as_deref(), Some("1.0"));
    assert!(row.is_enabled);
}

// ── Activity log ─────────────────────────────────────────────────

struct BrokenLog;

#[async_trait]
impl ActivityLog for BrokenLog {
    async fn record(&self, _entry: ActivityEntry) -> SyncResult<()> {
        Err(SyncError::Activity("disk full".into()))
    }
}

#[tokio::test]
async fn activity_is_recorded_for_success_and_failure() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    seed_installation(&db, &site, &plugin, "1.0", false);
    let connector = Arc::new(ScriptedConnector::default());
    connector.push_ack(Ok(ack(true, "activated")));
    connector.push_ack(Err(ConnectorError::Timeout));
    let log = Arc::new(MemoryActivityLog::default());
    let orchestrator = ActionOrchestrator::with_activity_log(connector, db.clone(), log.clone());

    orchestrator
        .activate(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();
    orchestrator
        .deactivate(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap_err();

    let entries = log.entries().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "activate");
    assert_eq!(entries[0].outcome, ActivityOutcome::Succeeded);
    assert_eq!(entries[0].entity_id, Some(plugin.id));
    assert_eq!(entries[1].action, "deactivate");
    assert_eq!(entries[1].outcome, ActivityOutcome::Failed);
}

#[tokio::test]
async fn activity_log_failure_does_not_fail_the_action() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let plugin = add_entity(&db, EntityKind::Plugin, "p");
    seed_installation(&db, &site, &plugin, "1.0", false);
    let orchestrator = ActionOrchestrator::with_activity_log(
        Arc::new(ScriptedConnector::default()),
        db.clone(),
        Arc::new(BrokenLog),
    );

    let outcome = orchestrator
        .activate(&site.id, EntityKind::Plugin, &slug("p"))
        .await
        .unwrap();
    assert_eq!(outcome.action, "activate");
    assert!(installation(&db, &site, &plugin).unwrap().is_active);
}

// ── Connector update ─────────────────────────────────────────────

#[tokio::test]
async fn update_connector_records_new_version() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/updateSelf"))
        .and(body_partial_json(serde_json::json!({
            "file_url": "https://pkg.example/connector-2.0.zip",
            "new_version": "2.0.0"
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "success": true, "message": "updated" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = http_orchestrator(&db)
        .update_connector(&site.id, "https://pkg.example/connector-2.0.zip", "2.0.0")
        .await
        .unwrap();

    assert_eq!(outcome.connector_version, "2.0.0");
    let stored = db.sites().get_site(&site.id).unwrap().unwrap();
    assert_eq!(stored.connector_version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn update_connector_validates_and_reports_rejection() {
    let db = setup_db();
    let site = add_site(&db, "a", "https://a.example");
    let connector = Arc::new(ScriptedConnector::default());
    connector.push_ack(Ok(ack(false, "download failed")));
    let orchestrator = ActionOrchestrator::new(connector, db.clone());

    let err = orchestrator.update_connector(&site.id, " ", "2.0.0").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = orchestrator
        .update_connector(&site.id, "https://pkg.example/c.zip", "2.0.0")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ActionRejected { .. }));
    let stored = db.sites().get_site(&site.id).unwrap().unwrap();
    assert_eq!(stored.connector_version, None);
}

// ── Site sync ────────────────────────────────────────────────────

#[tokio::test]
async fn sync_site_reconciles_and_flags_missing_theme_endpoint() {
    let server = MockServer::start().await;
    let db = setup_db();
    let site = add_site(&db, "a", &server.uri());
    let plugin = add_entity(&db, EntityKind::Plugin, "akismet");

    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "wp_version": "6.5.2",
            "connector_version": "1.1.0"
        })))
        .mount(&server)
        .await;
    mount_plugins(
        &server,
        serde_json::json!([{ "slug": "akismet", "version": "5.3", "is_active": true }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/wp-json/wphub/v1/listThemes"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let outcome = http_orchestrator(&db).sync_site(&site.id).await.unwrap();

    match &outcome.plugins {
        KindSync::Reconciled { report } => assert_eq!(report.inserted, vec!["akismet".to_string()]),
        other => panic!("expected reconciled plugins, got {other:?}"),
    }
    assert!(matches!(outcome.themes, KindSync::PendingConnectorUpdate { .. }));

    let stored = db.sites().get_site(&site.id).unwrap().unwrap();
    assert_eq!(stored.status, SiteStatus::Active);
    assert_eq!(stored.wp_version.as_deref(), Some("6.5.2"));
    assert_eq!(stored.connector_version.as_deref(), Some("1.1.0"));
    assert!(stored.last_connection.is_some());

    let row = installation(&db, &site, &plugin).unwrap();
    assert_eq!(row.status, InstallationStatus::Active);
}

#[tokio::test]
async fn sync_of_unreachable_site_marks_error() {
    let db = setup_db();
    let site = add_site(&db, "down", "http://127.0.0.1:1");

    let err = http_orchestrator(&db).sync_site(&site.id).await.unwrap_err();

    assert!(matches!(err, SyncError::Connector(ref e) if e.is_transient()));
    let stored = db.sites().get_site(&site.id).unwrap().unwrap();
    assert_eq!(stored.status, SiteStatus::Error);
    assert_eq!(stored.last_connection, None);
}
