//! Wire types for the connector protocol.

use serde::{Deserialize, Serialize};
use wphub_types::InventoryItem;

/// Result of a liveness check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReport {
    #[serde(default)]
    pub wp_version: Option<String>,
    #[serde(default)]
    pub connector_version: Option<String>,
}

/// Acknowledgement returned by every mutating connector endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAck {
    #[serde(default, deserialize_with = "deserialize_bool_lenient")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Installed version after the action (plugin endpoints).
    #[serde(default, deserialize_with = "deserialize_opt_version")]
    pub version: Option<String>,
    /// Slug of the active theme after the action (theme endpoints).
    #[serde(default)]
    pub active_theme: Option<String>,
}

/// Response body of `getInstalledPlugins`.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct InstalledPluginsResponse {
    #[serde(default = "default_true", deserialize_with = "deserialize_bool_lenient")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub plugins: Vec<WireEntity>,
}

/// Response body of `listThemes`.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ThemesResponse {
    #[serde(default = "default_true", deserialize_with = "deserialize_bool_lenient")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub themes: Vec<WireEntity>,
    #[serde(default)]
    pub active_theme: Option<String>,
}

/// A plugin or theme as the connector reports it.
///
/// Connectors built against older WordPress releases send `"1"`/`"0"` for
/// flags and bare numbers for versions; both are accepted.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct WireEntity {
    #[serde(alias = "stylesheet")]
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_version")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_lenient")]
    pub is_active: bool,
}

impl WireEntity {
    pub(crate) fn into_item(self, active_override: bool) -> InventoryItem {
        InventoryItem {
            slug: self.slug,
            version: self.version.unwrap_or_default(),
            is_active: self.is_active || active_override,
            name: self.name,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Accepts a JSON bool, a 0/1 number, or a string such as `"1"` / `"true"`.
fn deserialize_bool_lenient<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct BoolVisitor;
    impl<'de> de::Visitor<'de> for BoolVisitor {
        type Value = bool;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean, 0/1, or a boolean-like string")
        }
        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> { Ok(v) }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> { Ok(v != 0) }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> { Ok(v != 0) }
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> { Ok(v != 0.0) }
        fn visit_unit<E: de::Error>(self) -> Result<bool, E> { Ok(false) }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "active" => Ok(true),
                "" | "0" | "false" | "no" | "inactive" => Ok(false),
                other => Err(de::Error::custom(format!("not a boolean: {other}"))),
            }
        }
    }
    deserializer.deserialize_any(BoolVisitor)
}

/// Accepts a string, a number, or null.
fn deserialize_opt_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct VersionVisitor;
    impl<'de> de::Visitor<'de> for VersionVisitor {
        type Value = Option<String>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a version string or number")
        }
        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> { Ok(None) }
        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> { Ok(None) }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> { Ok(Some(v.to_string())) }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> { Ok(Some(v.to_string())) }
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> { Ok(Some(v.to_string())) }
    }
    deserializer.deserialize_any(VersionVisitor)
}
