//! The HTTP/SSE surface.
//!
//! Routes split into **public** (`/healthz`, `/version`) and
//! **protected** (everything else, behind the API-key middleware).
//! Every response carries `X-Request-Id` (generated when absent), all
//! error bodies are `{error: {code, message}}`, and request bodies are
//! capped at 2 MiB (32 MiB for workspace import).

pub mod agent;
pub mod auth;
pub mod channels;
pub mod chats;
pub mod cron;
pub mod envs;
pub mod models;
pub mod workspace;

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use nx_domain::error::Error;

use crate::state::AppState;

const BODY_LIMIT: usize = 2 * 1024 * 1024;
const IMPORT_BODY_LIMIT: usize = 32 * 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps the domain error for the wire: status from the taxonomy, body
/// `{error: {code, message}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = %self.0.code(), error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": { "code": self.0.code(), "message": self.0.to_string() }
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON extractor with taxonomy-conformant rejections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `Json<T>` whose rejection is `invalid_json` instead of axum's
/// plain-text default.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(Error::InvalidJson(rejection.body_text()))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health / version
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full API router. `state` is needed at build time to wire
/// the auth middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/version", get(version));

    let api = Router::new()
        // Chats
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route(
            "/chats/:chat_id",
            get(chats::get_chat).delete(chats::delete_chat),
        )
        // Agent
        .route("/agent/process", post(agent::process))
        .route("/agent/system-layers", get(agent::system_layers))
        // Models / providers
        .route("/models", get(models::list_models))
        .route("/models/catalog", get(models::catalog))
        .route(
            "/models/active",
            get(models::get_active).put(models::put_active),
        )
        .route("/models/:provider_id/config", put(models::put_config))
        .route("/models/:provider_id", delete(models::delete_provider))
        // Envs
        .route("/envs", get(envs::list_envs).put(envs::put_envs))
        .route("/envs/:key", delete(envs::delete_env))
        // Channel configuration
        .route("/config/channels", get(channels::list_channels))
        .route("/config/channels/types", get(channels::channel_types))
        .route(
            "/config/channels/:name",
            get(channels::get_channel).put(channels::put_channel),
        )
        // Cron
        .route("/cron/jobs", get(cron::list_jobs).post(cron::create_job))
        .route(
            "/cron/jobs/:id",
            get(cron::get_job).put(cron::put_job).delete(cron::delete_job),
        )
        .route("/cron/jobs/:id/pause", post(cron::pause_job))
        .route("/cron/jobs/:id/resume", post(cron::resume_job))
        .route("/cron/jobs/:id/run", post(cron::run_job))
        .route("/cron/jobs/:id/state", get(cron::job_state))
        // Workspace
        .route("/workspace/files", get(workspace::list_files))
        .route(
            "/workspace/files/*path",
            get(workspace::get_file)
                .put(workspace::put_file)
                .delete(workspace::delete_file),
        )
        .route("/workspace/export", get(workspace::export_workspace))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT));

    // Workspace import carries archives and gets its own, higher cap.
    let import = Router::new()
        .route("/workspace/import", post(workspace::import_workspace))
        .layer(RequestBodyLimitLayer::new(IMPORT_BODY_LIMIT));

    let protected = api.merge(import).route_layer(middleware::from_fn_with_state(
        state,
        auth::require_api_key,
    ));

    public
        .merge(protected)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
