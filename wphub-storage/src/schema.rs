use crate::error::StorageResult;
use rusqlite::Connection;

pub(crate) fn initialize(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'unknown',
            last_connection TEXT,
            wp_version TEXT,
            connector_version TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS catalog_entities (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT,
            description TEXT,
            author TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (kind, slug)
        );

        CREATE TABLE IF NOT EXISTS installations (
            site_id TEXT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
            entity_id TEXT NOT NULL REFERENCES catalog_entities(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            installed_version TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_enabled INTEGER NOT NULL DEFAULT 0,
            last_sync TEXT,
            row_version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (site_id, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_installations_site ON installations(site_id, kind);
        CREATE INDEX IF NOT EXISTS idx_installations_entity ON installations(entity_id);
        "#,
    )?;
    Ok(())
}
