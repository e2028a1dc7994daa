//! Catalog store: plugins and themes, and the per-site installation relation.
//!
//! Installation rows are keyed by `(site_id, entity_id)`. A row is *present*
//! when `installed_version IS NOT NULL`; present rows are what a catalog
//! entity reports as `installed_on`. Writes go through `save_installation`
//! only, and are conditional on the caller's view of `row_version`.

use crate::error::{StorageError, StorageResult};
use crate::site_store::parse_timestamp;
use crate::Database;
use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::debug;
use wphub_types::{
    CatalogEntity, EntityId, EntityKind, InstalledOn, Installation, NewCatalogEntity, SiteId,
};

const ENTITY_COLUMNS: &str = "id, kind, slug, name, version, description, author";
const INSTALLATION_COLUMNS: &str = "site_id, entity_id, kind, status, installed_version, \
     is_active, is_enabled, last_sync, row_version, updated_at";

/// SQLite's default host parameter limit is 999; stay well below it.
const SLUG_CHUNK: usize = 500;

/// Outcome of a conditional installation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row was written; carries its new `row_version`.
    Written { row_version: i64 },
    /// The row changed (or appeared) since the caller read it.
    Conflict,
}

/// Access to the catalog and the installation relation.
#[derive(Clone)]
pub struct CatalogStore {
    db: Database,
}

impl CatalogStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    // ── Entities ──

    /// Adds an entity, or refreshes name/version metadata of the entity with
    /// the same (kind, slug).
    pub fn upsert_entity(&self, new: &NewCatalogEntity) -> StorageResult<CatalogEntity> {
        {
            let conn = self.db.lock()?;
            conn.execute(
                "INSERT INTO catalog_entities (id, kind, slug, name, version, description, author, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT (kind, slug) DO UPDATE SET \
                     name = excluded.name, \
                     version = COALESCE(excluded.version, catalog_entities.version), \
                     description = COALESCE(excluded.description, catalog_entities.description), \
                     author = COALESCE(excluded.author, catalog_entities.author)",
                params![
                    EntityId::new().to_string(),
                    new.kind.as_str(),
                    new.slug,
                    new.name,
                    new.version,
                    new.description,
                    new.author,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        self.find_by_slug(new.kind, &new.slug)?
            .ok_or_else(|| StorageError::NotFound(format!("{} {}", new.kind, new.slug)))
    }

    pub fn get_entity(&self, id: &EntityId) -> StorageResult<Option<CatalogEntity>> {
        let raw = {
            let conn = self.db.lock()?;
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM catalog_entities WHERE id = ?1"),
                params![id.to_string()],
                RawEntity::from_row,
            )
            .optional()?
        };
        self.hydrate(raw)
    }

    pub fn find_by_slug(&self, kind: EntityKind, slug: &str) -> StorageResult<Option<CatalogEntity>> {
        let raw = {
            let conn = self.db.lock()?;
            conn.query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM catalog_entities WHERE kind = ?1 AND slug = ?2"),
                params![kind.as_str(), slug],
                RawEntity::from_row,
            )
            .optional()?
        };
        self.hydrate(raw)
    }

    /// Lists all entities of a kind with their `installed_on` projections.
    pub fn list_entities(&self, kind: EntityKind) -> StorageResult<Vec<CatalogEntity>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM catalog_entities WHERE kind = ?1 ORDER BY slug"
        ))?;
        let raws = stmt
            .query_map(params![kind.as_str()], RawEntity::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT entity_id, site_id, installed_version, is_active FROM installations \
             WHERE kind = ?1 AND installed_version IS NOT NULL ORDER BY site_id",
        )?;
        let mut by_entity: HashMap<String, Vec<InstalledOn>> = HashMap::new();
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;
        for row in rows {
            let (entity_id, site_id, version, is_active) = row?;
            by_entity.entry(entity_id).or_default().push(InstalledOn {
                site_id: parse_site_id(&site_id)?,
                version,
                is_active: Some(is_active),
            });
        }

        raws.into_iter()
            .map(|raw| {
                let installed_on = by_entity.remove(&raw.id).unwrap_or_default();
                raw.into_entity(installed_on)
            })
            .collect()
    }

    /// Deletes an entity and, via cascade, its installation rows.
    pub fn delete_entity(&self, id: &EntityId) -> StorageResult<bool> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            "DELETE FROM catalog_entities WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Resolves reported slugs to catalog entity ids. Slugs unknown to the
    /// catalog are absent from the result. Cost is proportional to the number
    /// of slugs, not to the catalog size.
    pub fn resolve_slugs(
        &self,
        kind: EntityKind,
        slugs: &[&str],
    ) -> StorageResult<HashMap<String, EntityId>> {
        let conn = self.db.lock()?;
        let mut resolved = HashMap::with_capacity(slugs.len());

        for chunk in slugs.chunks(SLUG_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT slug, id FROM catalog_entities WHERE kind = ? AND slug IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let args = std::iter::once(kind.as_str()).chain(chunk.iter().copied());
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (slug, id) = row?;
                resolved.insert(slug, parse_entity_id(&id)?);
            }
        }

        Ok(resolved)
    }

    /// Slugs for a set of entity ids (used to name rows in reports and logs).
    pub fn slugs_for(&self, ids: &[EntityId]) -> StorageResult<HashMap<EntityId, String>> {
        let conn = self.db.lock()?;
        let mut out = HashMap::with_capacity(ids.len());
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        for chunk in id_strings.chunks(SLUG_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT id, slug FROM catalog_entities WHERE id IN ({placeholders})");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, slug) = row?;
                out.insert(parse_entity_id(&id)?, slug);
            }
        }
        Ok(out)
    }

    // ── Installations ──

    /// All installation rows of one kind on one site (the site-scoped index).
    pub fn installations_for_site(
        &self,
        site_id: &SiteId,
        kind: EntityKind,
    ) -> StorageResult<Vec<Installation>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INSTALLATION_COLUMNS} FROM installations WHERE site_id = ?1 AND kind = ?2"
        ))?;
        let raws = stmt
            .query_map(params![site_id.to_string(), kind.as_str()], RawInstallation::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawInstallation::into_installation).collect()
    }

    pub fn get_installation(
        &self,
        site_id: &SiteId,
        entity_id: &EntityId,
    ) -> StorageResult<Option<Installation>> {
        let conn = self.db.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {INSTALLATION_COLUMNS} FROM installations WHERE site_id = ?1 AND entity_id = ?2"
                ),
                params![site_id.to_string(), entity_id.to_string()],
                RawInstallation::from_row,
            )
            .optional()?;
        raw.map(RawInstallation::into_installation).transpose()
    }

    /// Writes an installation row conditionally.
    ///
    /// `expected_version == None` inserts and conflicts if the row already
    /// exists; `Some(v)` updates and conflicts unless the stored
    /// `row_version` is still `v`. The `row_version` field of `inst` is
    /// ignored; the new version is returned.
    pub fn save_installation(
        &self,
        inst: &Installation,
        expected_version: Option<i64>,
    ) -> StorageResult<WriteOutcome> {
        let conn = self.db.lock()?;
        let now = Utc::now().to_rfc3339();
        let last_sync = inst.last_sync.map(|t| t.to_rfc3339());

        let (changed, row_version) = match expected_version {
            None => {
                let n = conn.execute(
                    "INSERT INTO installations (site_id, entity_id, kind, status, installed_version, \
                         is_active, is_enabled, last_sync, row_version, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9) \
                     ON CONFLICT (site_id, entity_id) DO NOTHING",
                    params![
                        inst.site_id.to_string(),
                        inst.entity_id.to_string(),
                        inst.kind.as_str(),
                        inst.status.as_str(),
                        inst.installed_version,
                        inst.is_active,
                        inst.is_enabled,
                        last_sync,
                        now,
                    ],
                )?;
                (n, 1)
            }
            Some(expected) => {
                let n = conn.execute(
                    "UPDATE installations SET status = ?3, installed_version = ?4, is_active = ?5, \
                         is_enabled = ?6, last_sync = ?7, row_version = ?8 + 1, updated_at = ?9 \
                     WHERE site_id = ?1 AND entity_id = ?2 AND row_version = ?8",
                    params![
                        inst.site_id.to_string(),
                        inst.entity_id.to_string(),
                        inst.status.as_str(),
                        inst.installed_version,
                        inst.is_active,
                        inst.is_enabled,
                        last_sync,
                        expected,
                        now,
                    ],
                )?;
                (n, expected + 1)
            }
        };

        if changed == 0 {
            debug!(
                "installation write conflict for site {} entity {} (expected {:?})",
                inst.site_id, inst.entity_id, expected_version
            );
            return Ok(WriteOutcome::Conflict);
        }

        self.db.installation_writes.fetch_add(1, Ordering::Relaxed);
        Ok(WriteOutcome::Written { row_version })
    }

    /// Removes an installation row if it is still at `expected_version`.
    pub fn delete_installation(
        &self,
        site_id: &SiteId,
        entity_id: &EntityId,
        expected_version: i64,
    ) -> StorageResult<WriteOutcome> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            "DELETE FROM installations WHERE site_id = ?1 AND entity_id = ?2 AND row_version = ?3",
            params![site_id.to_string(), entity_id.to_string(), expected_version],
        )?;
        if n == 0 {
            return Ok(WriteOutcome::Conflict);
        }
        self.db.installation_writes.fetch_add(1, Ordering::Relaxed);
        Ok(WriteOutcome::Written {
            row_version: expected_version,
        })
    }

    /// `installed_on` projection for one entity.
    pub fn installed_on(&self, entity_id: &EntityId) -> StorageResult<Vec<InstalledOn>> {
        let conn = self.db.lock()?;
        installed_on_locked(&conn, entity_id)
    }

    /// Number of successful installation writes since the database was
    /// opened through this handle.
    pub fn installation_writes(&self) -> u64 {
        self.db.installation_writes.load(Ordering::Relaxed)
    }

    fn hydrate(&self, raw: Option<RawEntity>) -> StorageResult<Option<CatalogEntity>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entity_id = parse_entity_id(&raw.id)?;
        let installed_on = self.installed_on(&entity_id)?;
        raw.into_entity(installed_on).map(Some)
    }
}

fn installed_on_locked(
    conn: &rusqlite::Connection,
    entity_id: &EntityId,
) -> StorageResult<Vec<InstalledOn>> {
    let mut stmt = conn.prepare(
        "SELECT site_id, installed_version, is_active FROM installations \
         WHERE entity_id = ?1 AND installed_version IS NOT NULL ORDER BY site_id",
    )?;
    let rows = stmt
        .query_map(params![entity_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(site_id, version, is_active)| {
            Ok(InstalledOn {
                site_id: parse_site_id(&site_id)?,
                version,
                is_active: Some(is_active),
            })
        })
        .collect()
}

struct RawEntity {
    id: String,
    kind: String,
    slug: String,
    name: String,
    version: Option<String>,
    description: Option<String>,
    author: Option<String>,
}

impl RawEntity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            slug: row.get(2)?,
            name: row.get(3)?,
            version: row.get(4)?,
            description: row.get(5)?,
            author: row.get(6)?,
        })
    }

    fn into_entity(self, installed_on: Vec<InstalledOn>) -> StorageResult<CatalogEntity> {
        Ok(CatalogEntity {
            id: parse_entity_id(&self.id)?,
            kind: self.kind.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))?,
            slug: self.slug,
            name: self.name,
            version: self.version,
            description: self.description,
            author: self.author,
            installed_on,
        })
    }
}

struct RawInstallation {
    site_id: String,
    entity_id: String,
    kind: String,
    status: String,
    installed_version: Option<String>,
    is_active: bool,
    is_enabled: bool,
    last_sync: Option<String>,
    row_version: i64,
    updated_at: String,
}

impl RawInstallation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            site_id: row.get(0)?,
            entity_id: row.get(1)?,
            kind: row.get(2)?,
            status: row.get(3)?,
            installed_version: row.get(4)?,
            is_active: row.get(5)?,
            is_enabled: row.get(6)?,
            last_sync: row.get(7)?,
            row_version: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_installation(self) -> StorageResult<Installation> {
        Ok(Installation {
            site_id: parse_site_id(&self.site_id)?,
            entity_id: parse_entity_id(&self.entity_id)?,
            kind: self.kind.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))?,
            status: self.status.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))?,
            installed_version: self.installed_version,
            is_active: self.is_active,
            is_enabled: self.is_enabled,
            last_sync: self.last_sync.as_deref().map(parse_timestamp).transpose()?,
            row_version: self.row_version,
            updated_at: Some(parse_timestamp(&self.updated_at)?),
        })
    }
}

fn parse_site_id(raw: &str) -> StorageResult<SiteId> {
    raw.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))
}

fn parse_entity_id(raw: &str) -> StorageResult<EntityId> {
    raw.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))
}
