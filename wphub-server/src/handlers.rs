//! Request handlers for the control-plane API.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use wphub_sync::EntityRef;
use wphub_types::{EntityId, EntityKind, SiteId};

/// Successful response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

/// Body of `/api/plugins/*` and `/api/themes/*`.
#[derive(Debug, Deserialize)]
pub struct EntityActionRequest {
    pub site_id: SiteId,
    #[serde(default, alias = "plugin_id", alias = "theme_id")]
    pub entity_id: Option<EntityId>,
    #[serde(default, alias = "plugin_slug", alias = "theme_slug")]
    pub slug: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl EntityActionRequest {
    fn entity_ref(&self, kind: EntityKind) -> Result<EntityRef, ApiError> {
        if let Some(id) = self.entity_id {
            return Ok(EntityRef::Id(id));
        }
        match self.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => Ok(EntityRef::Slug(slug.to_string())),
            _ => Err(ApiError::bad_request(format!(
                "{kind}_id or {kind}_slug is required"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SiteRequest {
    pub site_id: SiteId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectorRequest {
    pub site_id: SiteId,
    pub file_url: String,
    pub new_version: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub version: &'static str,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

pub async fn health() -> Json<ApiResponse<Health>> {
    ApiResponse::ok(
        "ok",
        Health {
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

pub async fn plugin_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    payload: Result<Json<EntityActionRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    entity_action(state, EntityKind::Plugin, &action, body(payload)?).await
}

pub async fn theme_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    payload: Result<Json<EntityActionRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    entity_action(state, EntityKind::Theme, &action, body(payload)?).await
}

async fn entity_action(
    state: AppState,
    kind: EntityKind,
    action: &str,
    req: EntityActionRequest,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let entity = req.entity_ref(kind)?;
    let orchestrator = &state.orchestrator;
    let site_id = &req.site_id;

    let outcome = match action {
        "install" => {
            orchestrator
                .install(site_id, kind, &entity, req.file_url.as_deref())
                .await?
        }
        "uninstall" => orchestrator.uninstall(site_id, kind, &entity).await?,
        "activate" => orchestrator.activate(site_id, kind, &entity).await?,
        "deactivate" => orchestrator.deactivate(site_id, kind, &entity).await?,
        "toggle" => orchestrator.toggle(site_id, kind, &entity).await?,
        "enable" => {
            let enabled = req.enabled.unwrap_or(true);
            let row = orchestrator
                .enable_for_site(site_id, kind, &entity, enabled)
                .await?;
            let verb = if enabled { "enabled" } else { "disabled" };
            return Ok(ApiResponse::ok(
                format!("{kind} {verb} for site"),
                to_value(&row)?,
            ));
        }
        other => return Err(ApiError::not_found(format!("unknown {kind} action {other:?}"))),
    };

    Ok(ApiResponse::ok(outcome.message.clone(), to_value(&outcome)?))
}

pub async fn sync_site(
    State(state): State<AppState>,
    payload: Result<Json<SiteRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let req = body(payload)?;
    let outcome = state.orchestrator.sync_site(&req.site_id).await?;
    Ok(ApiResponse::ok("site synced", to_value(&outcome)?))
}

pub async fn update_connector(
    State(state): State<AppState>,
    payload: Result<Json<UpdateConnectorRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let req = body(payload)?;
    let outcome = state
        .orchestrator
        .update_connector(&req.site_id, &req.file_url, &req.new_version)
        .await?;
    Ok(ApiResponse::ok(outcome.message.clone(), to_value(&outcome)?))
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::internal(e.to_string()))
}
