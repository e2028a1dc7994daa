use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{EntityId, ParseError, SiteId};

/// The two kinds of catalog entity a connector can manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Plugin,
    Theme,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Plugin => "plugin",
            EntityKind::Theme => "theme",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plugin" | "plugins" => Ok(EntityKind::Plugin),
            "theme" | "themes" => Ok(EntityKind::Theme),
            other => Err(ParseError::new("entity kind", other)),
        }
    }
}

/// One site on which a catalog entity is known to be installed.
///
/// This is a projection of the installation relation: a record exists
/// exactly when the site's installation row carries an installed version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledOn {
    pub site_id: SiteId,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// A plugin or theme known to the control plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Stable identifier, unique within its kind.
    pub slug: String,
    pub name: String,
    /// Latest version published to the catalog, if known.
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub installed_on: Vec<InstalledOn>,
}

impl CatalogEntity {
    /// Returns the `installed_on` record for a site, if any.
    pub fn installed_on_site(&self, site_id: &SiteId) -> Option<&InstalledOn> {
        self.installed_on.iter().find(|r| &r.site_id == site_id)
    }
}

/// Fields required to add (or refresh) a catalog entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewCatalogEntity {
    pub kind: EntityKind,
    pub slug: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
}

impl NewCatalogEntity {
    pub fn new(kind: EntityKind, slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            slug: slug.into(),
            name: name.into(),
            version: None,
            description: None,
            author: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// One entry of a connector's authoritative inventory report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub slug: String,
    pub version: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl InventoryItem {
    pub fn new(slug: impl Into<String>, version: impl Into<String>, is_active: bool) -> Self {
        Self {
            slug: slug.into(),
            version: version.into(),
            is_active,
            name: None,
        }
    }
}
