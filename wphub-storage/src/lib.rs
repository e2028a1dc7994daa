//! SQLite storage layer for the wphub control plane.
//!
//! The relational store is the single source of truth and the only
//! serialization point between concurrent reconciliations and actions.
//!
//! # Architecture
//!
//! - `sites` holds the Site Registry (url, credential, connectivity)
//! - `catalog_entities` holds plugins and themes, unique per (kind, slug)
//! - `installations` is the one normalized (site, entity) relation; the
//!   catalog's `installed_on` lists are projections of its present rows
//! - Every installation write is conditional on `row_version`

mod catalog_store;
mod error;
mod schema;
mod site_store;

pub use catalog_store::{CatalogStore, WriteOutcome};
pub use error::{StorageError, StorageResult};
pub use site_store::SiteStore;

use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the control-plane database.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    installation_writes: Arc<AtomicU64>,
}

impl Database {
    /// Opens or creates the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_sqlite(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            installation_writes: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Site Registry view of the database.
    pub fn sites(&self) -> SiteStore {
        SiteStore::new(self.clone())
    }

    /// Catalog and installation view of the database.
    pub fn catalog(&self) -> CatalogStore {
        CatalogStore::new(self.clone())
    }

    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Open a SQLite connection tuned for a long-running control plane.
///
/// WAL lets the poller's reads proceed while an action writes; the busy
/// timeout absorbs short lock waits instead of failing with `SQLITE_BUSY`.
pub fn open_sqlite(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}
