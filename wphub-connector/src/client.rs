//! HTTP client for the connector protocol.
//!
//! One POST per call to `{site.url}/wp-json/wphub/v1/{endpoint}` carrying the
//! site's `api_key`. Non-2xx answers become `ConnectorError::Status`, except
//! 404 which becomes `ConnectorError::EndpointMissing`.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::types::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use wphub_types::{EntityKind, InventoryItem, Site};

const API_PREFIX: &str = "/wp-json/wphub/v1";

/// A mutating operation on a single plugin or theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorAction {
    Install,
    Uninstall,
    Activate,
    Deactivate,
}

impl ConnectorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorAction::Install => "install",
            ConnectorAction::Uninstall => "uninstall",
            ConnectorAction::Activate => "activate",
            ConnectorAction::Deactivate => "deactivate",
        }
    }

    /// Connector endpoint for this action on the given kind, if the protocol
    /// has one. Themes cannot be deactivated: WordPress always keeps exactly
    /// one active theme.
    pub fn endpoint(&self, kind: EntityKind) -> Option<&'static str> {
        match (kind, self) {
            (EntityKind::Plugin, ConnectorAction::Install) => Some("installPlugin"),
            (EntityKind::Plugin, ConnectorAction::Uninstall) => Some("uninstallPlugin"),
            (EntityKind::Plugin, ConnectorAction::Activate) => Some("activatePlugin"),
            (EntityKind::Plugin, ConnectorAction::Deactivate) => Some("deactivatePlugin"),
            (EntityKind::Theme, ConnectorAction::Install) => Some("installTheme"),
            (EntityKind::Theme, ConnectorAction::Uninstall) => Some("uninstallTheme"),
            (EntityKind::Theme, ConnectorAction::Activate) => Some("activateTheme"),
            (EntityKind::Theme, ConnectorAction::Deactivate) => None,
        }
    }
}

impl fmt::Display for ConnectorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The connector protocol, as seen by the orchestration layer.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Liveness and connector-version check.
    async fn ping(&self, site: &Site) -> ConnectorResult<PingReport>;

    /// Authoritative inventory of installed plugins or themes.
    async fn list_installed(
        &self,
        site: &Site,
        kind: EntityKind,
    ) -> ConnectorResult<Vec<InventoryItem>>;

    /// Runs a mutating action. An acknowledged failure (`success: false`) is
    /// returned as `Ok` with `ack.success == false`.
    async fn perform(
        &self,
        site: &Site,
        kind: EntityKind,
        action: ConnectorAction,
        slug: &str,
        file_url: Option<&str>,
    ) -> ConnectorResult<ActionAck>;

    /// Asks the connector to update itself from a package URL.
    async fn update_self(
        &self,
        site: &Site,
        file_url: &str,
        new_version: &str,
    ) -> ConnectorResult<ActionAck>;
}

/// reqwest-backed connector client. Stateless apart from the pooled HTTP
/// client; safe to share behind an `Arc`.
pub struct ConnectorClient {
    client: Client,
    config: ConnectorConfig,
}

impl ConnectorClient {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConnectorError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    // ── Convenience wrappers ──

    pub async fn install(
        &self,
        site: &Site,
        kind: EntityKind,
        slug: &str,
        file_url: Option<&str>,
    ) -> ConnectorResult<ActionAck> {
        self.perform(site, kind, ConnectorAction::Install, slug, file_url)
            .await
    }

    pub async fn uninstall(&self, site: &Site, kind: EntityKind, slug: &str) -> ConnectorResult<ActionAck> {
        self.perform(site, kind, ConnectorAction::Uninstall, slug, None)
            .await
    }

    pub async fn activate(&self, site: &Site, kind: EntityKind, slug: &str) -> ConnectorResult<ActionAck> {
        self.perform(site, kind, ConnectorAction::Activate, slug, None)
            .await
    }

    pub async fn deactivate(&self, site: &Site, kind: EntityKind, slug: &str) -> ConnectorResult<ActionAck> {
        self.perform(site, kind, ConnectorAction::Deactivate, slug, None)
            .await
    }

    // ── Transport ──

    /// POSTs `body` to the endpoint, retrying once on a transient failure.
    ///
    /// Read-only calls retry on any transient failure; mutating calls only
    /// when the connection was never established, since a timed-out request
    /// may already have been applied by the site.
    async fn post(
        &self,
        site: &Site,
        endpoint: &str,
        body: &serde_json::Value,
        read_only: bool,
    ) -> ConnectorResult<String> {
        let url = endpoint_url(&site.url, endpoint);
        debug!(
            "POST {url} (site {}, key {})",
            site.id,
            key_fingerprint(&site.api_key)
        );

        match self.send_once(&url, endpoint, body).await {
            Err(e) if self.should_retry(&e, read_only) => {
                warn!("{endpoint} on site {} failed ({e}), retrying once", site.id);
                if self.config.retry_backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                self.send_once(&url, endpoint, body).await
            }
            other => other,
        }
    }

    fn should_retry(&self, err: &ConnectorError, read_only: bool) -> bool {
        self.config.retry_transient
            && err.is_transient()
            && (read_only || matches!(err, ConnectorError::Unreachable(_)))
    }

    async fn send_once(
        &self,
        url: &str,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> ConnectorResult<String> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(ConnectorError::EndpointMissing {
                action: endpoint.to_string(),
                body: text,
            });
        }
        if !status.is_success() {
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl Connector for ConnectorClient {
    async fn ping(&self, site: &Site) -> ConnectorResult<PingReport> {
        let body = serde_json::json!({ "api_key": site.api_key });
        let text = self.post(site, "ping", &body, true).await?;

        // A bare 200 is a valid pong; version fields are a bonus.
        if text.trim().is_empty() {
            return Ok(PingReport::default());
        }
        match serde_json::from_str::<PingReport>(&text) {
            Ok(report) => Ok(report),
            Err(e) => {
                debug!("ping on site {} returned an unparseable body ({e}); ignoring it", site.id);
                Ok(PingReport::default())
            }
        }
    }

    async fn list_installed(
        &self,
        site: &Site,
        kind: EntityKind,
    ) -> ConnectorResult<Vec<InventoryItem>> {
        let body = serde_json::json!({ "api_key": site.api_key });

        match kind {
            EntityKind::Plugin => {
                let text = self.post(site, "getInstalledPlugins", &body, true).await?;
                let resp: InstalledPluginsResponse = parse(&text, "getInstalledPlugins")?;
                if !resp.success {
                    return Err(ConnectorError::Rejected {
                        action: "getInstalledPlugins".to_string(),
                        message: resp.message.unwrap_or_default(),
                    });
                }
                Ok(resp
                    .plugins
                    .into_iter()
                    .map(|p| p.into_item(false))
                    .collect())
            }
            EntityKind::Theme => {
                let text = self.post(site, "listThemes", &body, true).await?;
                let resp: ThemesResponse = parse(&text, "listThemes")?;
                if !resp.success {
                    return Err(ConnectorError::Rejected {
                        action: "listThemes".to_string(),
                        message: resp.message.unwrap_or_default(),
                    });
                }
                let active = resp.active_theme;
                Ok(resp
                    .themes
                    .into_iter()
                    .map(|t| {
                        let is_current = active.as_deref() == Some(t.slug.as_str());
                        t.into_item(is_current)
                    })
                    .collect())
            }
        }
    }

    async fn perform(
        &self,
        site: &Site,
        kind: EntityKind,
        action: ConnectorAction,
        slug: &str,
        file_url: Option<&str>,
    ) -> ConnectorResult<ActionAck> {
        let endpoint = action.endpoint(kind).ok_or_else(|| ConnectorError::Unsupported {
            kind,
            action: action.as_str().to_string(),
        })?;

        let slug_field = match kind {
            EntityKind::Plugin => "plugin_slug",
            EntityKind::Theme => "theme_slug",
        };
        let mut body = serde_json::json!({ "api_key": site.api_key });
        body[slug_field] = serde_json::Value::String(slug.to_string());
        if let Some(file_url) = file_url {
            body["file_url"] = serde_json::Value::String(file_url.to_string());
        }

        let text = self.post(site, endpoint, &body, false).await?;
        parse(&text, endpoint)
    }

    async fn update_self(
        &self,
        site: &Site,
        file_url: &str,
        new_version: &str,
    ) -> ConnectorResult<ActionAck> {
        let body = serde_json::json!({
            "api_key": site.api_key,
            "file_url": file_url,
            "new_version": new_version,
        });
        let text = self.post(site, "updateSelf", &body, false).await?;
        parse(&text, "updateSelf")
    }
}

fn parse<T: DeserializeOwned>(text: &str, endpoint: &str) -> ConnectorResult<T> {
    serde_json::from_str(text)
        .map_err(|e| ConnectorError::InvalidResponse(format!("{endpoint}: {e}")))
}

/// Builds the full endpoint URL, tolerating trailing slashes on the site URL.
pub fn endpoint_url(site_url: &str, endpoint: &str) -> String {
    format!("{}{API_PREFIX}/{endpoint}", site_url.trim_end_matches('/'))
}

/// Short, non-reversible identifier for a credential, safe to log.
pub fn key_fingerprint(api_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(api_key.as_bytes()));
    digest[..12].to_string()
}
