#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use wphub_connector::{
    ActionAck, Connector, ConnectorAction, ConnectorError, ConnectorResult, PingReport,
};
use wphub_storage::Database;
use wphub_types::{
    CatalogEntity, EntityKind, Installation, InstallationStatus, InventoryItem, NewCatalogEntity,
    NewSite, Site,
};

pub fn setup_db() -> Database {
    Database::open_in_memory().unwrap()
}

pub fn add_site(db: &Database, name: &str, url: &str) -> Site {
    db.sites()
        .create_site(&NewSite {
            name: name.into(),
            url: url.into(),
            api_key: format!("key-{name}"),
        })
        .unwrap()
}

pub fn add_entity(db: &Database, kind: EntityKind, slug: &str) -> CatalogEntity {
    db.catalog()
        .upsert_entity(&NewCatalogEntity::new(kind, slug, slug.to_uppercase()))
        .unwrap()
}

pub fn seed_installation(
    db: &Database,
    site: &Site,
    entity: &CatalogEntity,
    version: &str,
    active: bool,
) -> Installation {
    let inst = Installation {
        site_id: site.id,
        entity_id: entity.id,
        kind: entity.kind,
        status: if active {
            InstallationStatus::Active
        } else {
            InstallationStatus::Inactive
        },
        installed_version: Some(version.into()),
        is_active: active,
        is_enabled: false,
        last_sync: None,
        row_version: 0,
        updated_at: None,
    };
    db.catalog().save_installation(&inst, None).unwrap();
    db.catalog().get_installation(&site.id, &entity.id).unwrap().unwrap()
}

/// Rewrites a stored row's state in place and returns the stored result.
pub fn force_state(
    db: &Database,
    row: &Installation,
    status: InstallationStatus,
    version: Option<&str>,
    active: bool,
) -> Installation {
    let mut updated = row.clone();
    updated.status = status;
    updated.installed_version = version.map(str::to_string);
    updated.is_active = active;
    db.catalog().save_installation(&updated, Some(row.row_version)).unwrap();
    db.catalog().get_installation(&row.site_id, &row.entity_id).unwrap().unwrap()
}

pub fn installation(db: &Database, site: &Site, entity: &CatalogEntity) -> Option<Installation> {
    db.catalog().get_installation(&site.id, &entity.id).unwrap()
}

pub fn ack(success: bool, message: &str) -> ActionAck {
    ActionAck {
        success,
        message: message.into(),
        version: None,
        active_theme: None,
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// In-process connector with scripted responses.
#[derive(Default)]
pub struct ScriptedConnector {
    inventory: Mutex<HashMap<EntityKind, Vec<InventoryItem>>>,
    acks: Mutex<VecDeque<ConnectorResult<ActionAck>>>,
    performed: Mutex<Vec<(EntityKind, ConnectorAction, String)>>,
    lists: Mutex<usize>,
    before_perform: Mutex<Option<Hook>>,
}

impl ScriptedConnector {
    pub fn with_inventory(self, kind: EntityKind, items: Vec<InventoryItem>) -> Self {
        self.inventory.lock().unwrap().insert(kind, items);
        self
    }

    pub fn push_ack(&self, result: ConnectorResult<ActionAck>) {
        self.acks.lock().unwrap().push_back(result);
    }

    pub fn set_inventory(&self, kind: EntityKind, items: Vec<InventoryItem>) {
        self.inventory.lock().unwrap().insert(kind, items);
    }

    /// Runs `hook` once, right before the next `perform` call answers.
    pub fn before_perform(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_perform.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn performed(&self) -> Vec<(EntityKind, ConnectorAction, String)> {
        self.performed.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.lists.lock().unwrap()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn ping(&self, _site: &Site) -> ConnectorResult<PingReport> {
        Ok(PingReport {
            wp_version: Some("6.4.2".into()),
            connector_version: Some("1.0.0".into()),
        })
    }

    async fn list_installed(
        &self,
        _site: &Site,
        kind: EntityKind,
    ) -> ConnectorResult<Vec<InventoryItem>> {
        *self.lists.lock().unwrap() += 1;
        Ok(self
            .inventory
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn perform(
        &self,
        _site: &Site,
        kind: EntityKind,
        action: ConnectorAction,
        slug: &str,
        _file_url: Option<&str>,
    ) -> ConnectorResult<ActionAck> {
        self.performed
            .lock()
            .unwrap()
            .push((kind, action, slug.to_string()));
        let hook = self.before_perform.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.acks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ack(true, "ok")))
    }

    async fn update_self(
        &self,
        _site: &Site,
        _file_url: &str,
        _new_version: &str,
    ) -> ConnectorResult<ActionAck> {
        self.acks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ConnectorError::Timeout))
    }
}
