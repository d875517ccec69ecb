//! Channel configuration endpoints.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde_json::Value;

use nx_domain::error::Error;

use crate::runtime::channels::CHANNEL_TYPES;
use crate::state::AppState;

use super::{ApiJson, ApiResult};

fn require_known(name: &str) -> ApiResult<()> {
    if CHANNEL_TYPES.contains(&name) {
        Ok(())
    } else {
        Err(Error::ChannelNotSupported(name.to_string()).into())
    }
}

pub async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    let channels = state.store.read(|doc| doc.channels.clone());
    Json(serde_json::json!({ "channels": channels }))
}

pub async fn channel_types() -> impl IntoResponse {
    Json(serde_json::json!({ "types": CHANNEL_TYPES }))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require_known(&name)?;
    let config = state
        .store
        .read(|doc| doc.channels.get(&name).cloned())
        .unwrap_or_else(|| Value::Object(Default::default()));
    Ok(Json(serde_json::json!({ "name": name, "config": config })))
}

pub async fn put_channel(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(config): ApiJson<Value>,
) -> ApiResult<impl IntoResponse> {
    require_known(&name)?;
    if !config.is_object() {
        return Err(Error::InvalidJson("channel config must be an object".into()).into());
    }
    state.store.write(|doc| {
        doc.channels.insert(name.clone(), config.clone());
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "name": name, "config": config })))
}
