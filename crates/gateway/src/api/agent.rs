//! Agent endpoints — the primary interface for running turns.
//!
//! - `POST /agent/process` — JSON reply, or an SSE stream when
//!   `stream: true` (events framed as `data: <json>\n\n`, terminated by
//!   `data: [DONE]\n\n`).
//! - `GET /agent/system-layers` — prompt layer introspection.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use nx_domain::error::Error;

use crate::runtime::turn::{run_turn, run_turn_collect, ProcessRequest, TurnEvent};
use crate::runtime::prompts;
use crate::state::AppState;

use super::{ApiError, ApiJson, ApiResult};

fn validate_request(req: &ProcessRequest) -> ApiResult<()> {
    if req.session_id.trim().is_empty() {
        return Err(Error::InvalidJson("session_id is required".into()).into());
    }
    if req.user_id.trim().is_empty() {
        return Err(Error::InvalidJson("user_id is required".into()).into());
    }
    if req.input.is_empty() && req.biz_params.tool.is_none() {
        return Err(Error::InvalidJson("input must not be empty".into()).into());
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /agent/process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn process(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProcessRequest>,
) -> ApiResult<Response> {
    validate_request(&req)?;

    if req.stream {
        let rx = run_turn(state.engine.clone(), req);
        let stream = sse_event_stream(rx);
        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let outcome = run_turn_collect(&state.engine, req).await;
    if let Some(meta) = outcome.error {
        // Turn-level failures surface with their taxonomy status; the
        // partial assistant message is already persisted.
        return Err(ApiError(match meta.code.as_str() {
            "provider_not_configured" => Error::ProviderNotConfigured(meta.message),
            "provider_not_supported" => Error::ProviderNotSupported(meta.message),
            "provider_request_failed" => Error::ProviderRequestFailed(meta.message),
            "provider_invalid_reply" => Error::ProviderInvalidReply(meta.message),
            _ => Error::Internal(meta.message),
        }));
    }

    Ok(Json(serde_json::json!({
        "reply": outcome.reply,
        "chat_id": outcome.chat_id,
        "messages_appended": outcome.messages_appended,
    }))
    .into_response())
}

/// Frame turn events for the wire: one `data: <json>` frame per event,
/// a final `data: [DONE]` after the terminal event.
fn sse_event_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = matches!(&event, TurnEvent::Completed { .. } | TurnEvent::Error { .. });
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
            if terminal {
                break;
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /agent/system-layers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SystemLayersQuery {
    #[serde(default)]
    prompt_mode: Option<String>,
}

pub async fn system_layers(Query(query): Query<SystemLayersQuery>) -> impl IntoResponse {
    let mode = query.prompt_mode.as_deref().unwrap_or(prompts::DEFAULT_MODE);
    let layers = prompts::layer_infos(mode);
    let total: usize = layers.iter().map(|l| l.token_estimate).sum();
    Json(serde_json::json!({
        "prompt_mode": mode,
        "layers": layers,
        "token_estimate_total": total,
    }))
}
