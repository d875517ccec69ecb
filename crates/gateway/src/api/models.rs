//! Provider / model endpoints.
//!
//! The active slot invariant is enforced here on every write: it is
//! either fully empty or references a configured provider with a
//! non-empty model.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use nx_domain::error::Error;
use nx_domain::state::{ActiveLlm, ProviderSetting};

use crate::state::AppState;

use super::{ApiJson, ApiResult};

const KNOWN_ADAPTERS: &[&str] = &["demo", "openai_compat"];

/// Mask an API key to its last four characters.
fn mask_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let (providers, active) = state
        .store
        .read(|doc| (doc.providers.clone(), doc.active_llm.clone()));

    let mut rows: Vec<Value> = providers
        .iter()
        .map(|(id, p)| {
            serde_json::json!({
                "provider_id": id,
                "adapter_id": p.adapter_id,
                "base_url": p.base_url,
                "api_key": mask_key(&p.api_key),
                "timeout_ms": p.timeout_ms,
            })
        })
        .collect();
    rows.sort_by_key(|v| v["provider_id"].as_str().unwrap_or_default().to_string());

    Json(serde_json::json!({ "providers": rows, "active": active }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /models/catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn catalog() -> impl IntoResponse {
    Json(serde_json::json!({
        "adapters": [
            {
                "adapter_id": "demo",
                "description": "Deterministic echo; no upstream, no credentials.",
                "models": ["demo"],
            },
            {
                "adapter_id": "openai_compat",
                "description": "Any chat-completions-shaped endpoint.",
                "models": [
                    "gpt-4o",
                    "gpt-4o-mini",
                    "deepseek-chat",
                    "qwen-plus",
                    "moonshot-v1-8k",
                ],
            },
        ]
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /models/active, PUT /models/active
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_active(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.store.read(|doc| doc.active_llm.clone());
    Json(serde_json::json!({ "active": active }))
}

#[derive(Debug, Deserialize)]
pub struct PutActiveRequest {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
}

pub async fn put_active(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<PutActiveRequest>,
) -> ApiResult<impl IntoResponse> {
    let active = ActiveLlm {
        provider_id: body.provider_id,
        model: body.model,
    };

    state.store.write(|doc| {
        if !active.is_empty() {
            if active.provider_id.is_empty() || active.model.is_empty() {
                return Err(Error::InvalidModelSlot(
                    "active slot requires both provider_id and model".into(),
                ));
            }
            if !doc.providers.contains_key(&active.provider_id) {
                return Err(Error::ProviderNotFound(active.provider_id.clone()));
            }
        }
        doc.active_llm = active.clone();
        Ok(())
    })?;

    Ok(Json(serde_json::json!({ "active": active })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /models/:provider_id/config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PutConfigRequest {
    #[serde(default)]
    pub adapter_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn put_config(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    ApiJson(body): ApiJson<PutConfigRequest>,
) -> ApiResult<impl IntoResponse> {
    if provider_id.trim().is_empty() {
        return Err(Error::InvalidProviderConfig("provider_id must not be empty".into()).into());
    }
    if !body.adapter_id.is_empty() && !KNOWN_ADAPTERS.contains(&body.adapter_id.as_str()) {
        return Err(Error::InvalidProviderConfig(format!(
            "unknown adapter_id '{}' (known: {KNOWN_ADAPTERS:?})",
            body.adapter_id
        ))
        .into());
    }
    if let Some(0) = body.timeout_ms {
        return Err(Error::InvalidProviderConfig("timeout_ms must be positive".into()).into());
    }
    if !body.base_url.is_empty()
        && !(body.base_url.starts_with("http://") || body.base_url.starts_with("https://"))
    {
        return Err(Error::InvalidProviderConfig(
            "base_url must be an http(s) URL".into(),
        )
        .into());
    }

    let setting = ProviderSetting {
        adapter_id: body.adapter_id,
        api_key: body.api_key,
        base_url: body.base_url,
        headers: body.headers,
        timeout_ms: body.timeout_ms,
    };

    state.store.write(|doc| {
        doc.providers.insert(provider_id.clone(), setting);
        Ok(())
    })?;

    tracing::info!(provider_id, "provider configuration updated");
    Ok(Json(serde_json::json!({ "ok": true, "provider_id": provider_id })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /models/:provider_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.write(|doc| {
        if doc.providers.remove(&provider_id).is_none() {
            return Err(Error::ProviderNotFound(provider_id.clone()));
        }
        // Keep the active-slot invariant: a removed provider cannot
        // stay referenced.
        if doc.active_llm.provider_id == provider_id {
            doc.active_llm = ActiveLlm::default();
        }
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_key_shows_last_four() {
        assert_eq!(mask_key("sk-abcdef123456"), "****3456");
        assert_eq!(mask_key(""), "");
        assert_eq!(mask_key("ab"), "****ab");
    }
}
