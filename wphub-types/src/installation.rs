use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{EntityId, EntityKind, ParseError, SiteId};

/// Lifecycle status of a single (site, entity) installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    /// Enabled for the site, not installed.
    Available,
    /// Not enabled for the site, not installed.
    Unavailable,
    /// Transient marker while an install is in flight.
    Installing,
    Active,
    Inactive,
    Error,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationStatus::Available => "available",
            InstallationStatus::Unavailable => "unavailable",
            InstallationStatus::Installing => "installing",
            InstallationStatus::Active => "active",
            InstallationStatus::Inactive => "inactive",
            InstallationStatus::Error => "error",
        }
    }
}

impl fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(InstallationStatus::Available),
            "unavailable" => Ok(InstallationStatus::Unavailable),
            "installing" => Ok(InstallationStatus::Installing),
            "active" => Ok(InstallationStatus::Active),
            "inactive" => Ok(InstallationStatus::Inactive),
            "error" => Ok(InstallationStatus::Error),
            other => Err(ParseError::new("installation status", other)),
        }
    }
}

/// The per-(site, entity) installation record.
///
/// `installed_version` doubles as the presence marker: the entity is
/// considered installed on the site exactly when it is `Some`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub site_id: SiteId,
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub status: InstallationStatus,
    pub installed_version: Option<String>,
    pub is_active: bool,
    /// Whether the site administrator opted this entity in for the site,
    /// independent of actual install state.
    pub is_enabled: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, bumped on every write.
    pub row_version: i64,
    /// Time of the last write, set by storage. `None` before the row is
    /// first stored.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Installation {
    pub fn is_present(&self) -> bool {
        self.installed_version.is_some()
    }
}
