//! HTTP control plane for the wphub WordPress fleet manager.
//!
//! Routes (all `POST` and bearer-authenticated unless noted):
//! - `GET /api/health` (unauthenticated)
//! - `/api/plugins/{install|uninstall|activate|deactivate|toggle|enable}`
//! - `/api/themes/{install|uninstall|activate|toggle|enable}`
//! - `/api/sites/sync`
//! - `/api/sites/update-connector`

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

pub use auth::{Authenticator, Principal, StaticTokenAuthenticator};
pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use wphub_sync::ActionOrchestrator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ActionOrchestrator>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ActionOrchestrator>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            orchestrator,
            authenticator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/plugins/{action}", post(handlers::plugin_action))
        .route("/api/themes/{action}", post(handlers::theme_action))
        .route("/api/sites/sync", post(handlers::sync_site))
        .route("/api/sites/update-connector", post(handlers::update_connector))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .route("/api/health", get(handlers::health))
        .layer(middleware::from_fn(access_log_middleware))
        .with_state(state)
}

async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(token) = auth::bearer_token(request.headers()) else {
        return ApiError::unauthorized().into_response();
    };
    match state.authenticator.authenticate(token).await {
        Some(principal) => {
            debug!("authenticated request with token {}", principal.token_fingerprint);
            next.run(request).await
        }
        None => {
            warn!("rejected request to {} with unknown token", request.uri().path());
            ApiError::unauthorized().into_response()
        }
    }
}

async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        target: "wphub::access",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
