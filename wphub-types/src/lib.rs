//! Shared domain types for the wphub control plane.
//!
//! - Identifiers for sites and catalog entities
//! - Site records and connectivity status
//! - Catalog entities (plugins and themes) with their `installed_on` projection
//! - Per-(site, entity) installation records and their status lifecycle
//! - Inventory items as reported by a remote connector

mod catalog;
mod ids;
mod installation;
mod site;

pub use catalog::{CatalogEntity, EntityKind, InstalledOn, InventoryItem, NewCatalogEntity};
pub use ids::{EntityId, SiteId};
pub use installation::{Installation, InstallationStatus};
pub use site::{NewSite, Site, SiteStatus};

use thiserror::Error;

/// Error returned when a textual value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what}: {value:?}")]
pub struct ParseError {
    pub what: &'static str,
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
