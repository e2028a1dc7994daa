use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseError, SiteId};

/// Connectivity status of a site, as last observed by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    #[default]
    Unknown,
    Active,
    Error,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Unknown => "unknown",
            SiteStatus::Active => "active",
            SiteStatus::Error => "error",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(SiteStatus::Unknown),
            "active" => Ok(SiteStatus::Active),
            "error" => Ok(SiteStatus::Error),
            other => Err(ParseError::new("site status", other)),
        }
    }
}

/// A managed WordPress site running the wphub connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    /// Base URL of the WordPress installation (e.g. "https://example.com").
    pub url: String,
    /// Credential held by the site's connector. Never logged.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub status: SiteStatus,
    pub last_connection: Option<DateTime<Utc>>,
    pub wp_version: Option<String>,
    pub connector_version: Option<String>,
}

/// Fields required to register a new site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub url: String,
    pub api_key: String,
}
