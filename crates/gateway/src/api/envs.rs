//! Env key/value endpoints (stored in the state document, not the
//! process environment).

use std::collections::HashMap;
use std::sync::OnceLock;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use regex::Regex;

use nx_domain::error::Error;

use crate::state::AppState;

use super::{ApiJson, ApiResult};

fn env_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key regex is valid"))
}

fn validate_key(key: &str) -> ApiResult<()> {
    if env_key_re().is_match(key) {
        Ok(())
    } else {
        Err(Error::InvalidEnvKey(format!(
            "'{key}' — keys match [A-Za-z_][A-Za-z0-9_]*"
        ))
        .into())
    }
}

pub async fn list_envs(State(state): State<AppState>) -> impl IntoResponse {
    let envs = state.store.read(|doc| doc.envs.clone());
    Json(serde_json::json!({ "envs": envs }))
}

/// Merge-set the given keys.
pub async fn put_envs(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    for key in body.keys() {
        validate_key(key)?;
    }
    state.store.write(|doc| {
        doc.envs.extend(body);
        Ok(())
    })?;
    let envs = state.store.read(|doc| doc.envs.clone());
    Ok(Json(serde_json::json!({ "envs": envs })))
}

pub async fn delete_env(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    validate_key(&key)?;
    state.store.write(|doc| {
        doc.envs.remove(&key);
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
