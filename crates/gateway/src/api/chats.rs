//! Chat CRUD endpoints.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

use super::{ApiJson, ApiResult};

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    channel: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> impl IntoResponse {
    let chats = state
        .engine
        .chats
        .list(query.user_id.as_deref(), query.channel.as_deref());
    let count = chats.len();
    Json(serde_json::json!({ "chats": chats, "count": count }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub user_id: String,
    pub session_id: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_channel() -> String {
    "console".into()
}

pub async fn create_chat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let chat = state
        .engine
        .chats
        .resolve_or_create(&body.user_id, &body.channel, &body.session_id)?;

    // Optional naming on creation (or re-resolution).
    if let Some(name) = body.name {
        state.store.write(|doc| {
            if let Some(c) = doc.chats.get_mut(&chat.id) {
                c.name = name.clone();
            }
            Ok(())
        })?;
    }

    let chat = state.engine.chats.get(&chat.id)?;
    Ok(Json(serde_json::json!({ "chat": chat })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let chat = state.engine.chats.get(&chat_id)?;
    let messages = state.engine.chats.history(&chat_id)?;
    Ok(Json(serde_json::json!({ "chat": chat, "messages": messages })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.engine.chats.delete(&chat_id)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
