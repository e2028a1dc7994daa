//! Site Registry: storage access for site records, no business logic.

use crate::error::{StorageError, StorageResult};
use crate::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use wphub_types::{NewSite, Site, SiteId, SiteStatus};

const SITE_COLUMNS: &str =
    "id, name, url, api_key, status, last_connection, wp_version, connector_version";

/// Read/write access to site records.
#[derive(Clone)]
pub struct SiteStore {
    db: Database,
}

impl SiteStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a new site with status `unknown`.
    pub fn create_site(&self, new: &NewSite) -> StorageResult<Site> {
        let site = Site {
            id: SiteId::new(),
            name: new.name.clone(),
            url: new.url.trim_end_matches('/').to_string(),
            api_key: new.api_key.clone(),
            status: SiteStatus::Unknown,
            last_connection: None,
            wp_version: None,
            connector_version: None,
        };

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO sites (id, name, url, api_key, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site.id.to_string(),
                site.name,
                site.url,
                site.api_key,
                site.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(site)
    }

    pub fn get_site(&self, id: &SiteId) -> StorageResult<Option<Site>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?1"),
                params![id.to_string()],
                RawSite::from_row,
            )
            .optional()?;
        row.map(RawSite::into_site).transpose()
    }

    pub fn list_sites(&self) -> StorageResult<Vec<Site>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY name, id"))?;
        let rows = stmt
            .query_map([], RawSite::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawSite::into_site).collect()
    }

    /// Deletes a site and, via cascade, all its installation rows.
    pub fn delete_site(&self, id: &SiteId) -> StorageResult<bool> {
        let conn = self.db.lock()?;
        let n = conn.execute("DELETE FROM sites WHERE id = ?1", params![id.to_string()])?;
        Ok(n > 0)
    }

    /// Records a successful contact with the site's connector. Versions the
    /// connector did not report keep their previous values.
    pub fn mark_reachable(
        &self,
        id: &SiteId,
        at: DateTime<Utc>,
        wp_version: Option<&str>,
        connector_version: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            "UPDATE sites SET status = 'active', last_connection = ?2, \
             wp_version = COALESCE(?3, wp_version), \
             connector_version = COALESCE(?4, connector_version) \
             WHERE id = ?1",
            params![id.to_string(), at.to_rfc3339(), wp_version, connector_version],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("site {id}")));
        }
        Ok(())
    }

    /// Records a failed contact. `last_connection` keeps the time of the last
    /// successful one.
    pub fn mark_unreachable(&self, id: &SiteId) -> StorageResult<()> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            "UPDATE sites SET status = 'error' WHERE id = ?1",
            params![id.to_string()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("site {id}")));
        }
        Ok(())
    }

    pub fn set_connector_version(&self, id: &SiteId, version: &str) -> StorageResult<()> {
        let conn = self.db.lock()?;
        let n = conn.execute(
            "UPDATE sites SET connector_version = ?2 WHERE id = ?1",
            params![id.to_string(), version],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound(format!("site {id}")));
        }
        Ok(())
    }
}

struct RawSite {
    id: String,
    name: String,
    url: String,
    api_key: String,
    status: String,
    last_connection: Option<String>,
    wp_version: Option<String>,
    connector_version: Option<String>,
}

impl RawSite {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            api_key: row.get(3)?,
            status: row.get(4)?,
            last_connection: row.get(5)?,
            wp_version: row.get(6)?,
            connector_version: row.get(7)?,
        })
    }

    fn into_site(self) -> StorageResult<Site> {
        Ok(Site {
            id: self.id.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))?,
            name: self.name,
            url: self.url,
            api_key: self.api_key,
            status: self.status.parse().map_err(|e| StorageError::Corrupt(format!("{e}")))?,
            last_connection: self.last_connection.as_deref().map(parse_timestamp).transpose()?,
            wp_version: self.wp_version,
            connector_version: self.connector_version,
        })
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp {raw:?}: {e}")))
}
