//! The agent turn engine.
//!
//! One turn = one user prompt plus the zero-or-more tool round-trips
//! needed to answer it. The loop streams provider deltas out as they
//! arrive, dispatches requested tools through the registry, feeds the
//! results back, and stops on a text-only completion or the step budget.
//!
//! Entry points: [`run_turn`] (spawned, yields a channel of
//! [`TurnEvent`]s for SSE) and [`run_turn_collect`] (inline, aggregated
//! outcome for non-streaming callers and cron console tasks).

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use nx_domain::error::Error;
use nx_domain::message::{
    ContentPart, Message, Role, TimelineEntry, ToolCall,
};
use nx_domain::state::ChatMessage;
use nx_domain::stream::StreamEvent;
use nx_providers::adapter::{ChatAdapter, TurnRequest};
use nx_providers::openai_compat::parse_tool_arguments;
use nx_providers::resolve_adapter;

use super::{prompts, truncate_str, Engine};

/// Default step budget: provider calls per turn.
const DEFAULT_MAX_STEPS: u32 = 8;
const MAX_STEPS_CEILING: u32 = 64;
/// Cap applied to tool summaries surfaced in events and fed back to the
/// provider.
const SUMMARY_MAX_CHARS: usize = 2000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub input: Vec<InputMessage>,
    pub session_id: String,
    pub user_id: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub biz_params: BizParams,
}

fn default_channel() -> String {
    "console".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BizParams {
    /// Prompt mode: "default" or "codex".
    #[serde(default)]
    pub prompt_mode: Option<String>,
    /// Per-request step budget override.
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Force a single tool invocation without calling the provider.
    #[serde(default)]
    pub tool: Option<ForcedTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForcedTool {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ProcessRequest {
    /// One-shot text request, as built by cron console tasks.
    pub fn from_text(user_id: &str, session_id: &str, channel: &str, text: &str) -> Self {
        Self {
            input: vec![InputMessage {
                role: Role::User,
                content: vec![ContentPart::Text { text: text.into() }],
            }],
            session_id: session_id.into(),
            user_id: user_id.into(),
            channel: channel.into(),
            stream: false,
            biz_params: BizParams::default(),
        }
    }

    fn prompt_mode(&self) -> &str {
        self.biz_params
            .prompt_mode
            .as_deref()
            .unwrap_or(prompts::DEFAULT_MODE)
    }

    fn max_steps(&self) -> u32 {
        self.biz_params
            .max_steps
            .unwrap_or(DEFAULT_MAX_STEPS)
            .clamp(1, MAX_STEPS_CEILING)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent — the SSE event taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallNotice {
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResultNotice {
    pub name: String,
    pub ok: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMeta {
    pub code: String,
    pub message: String,
}

/// Events emitted during a single agent turn, serialized 1:1 onto the
/// SSE wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    StepStarted { step: u32 },
    AssistantDelta { step: u32, delta: String },
    ToolCall { step: u32, tool_call: ToolCallNotice },
    ToolResult { step: u32, tool_result: ToolResultNotice },
    Completed { reply: String },
    Error { meta: ErrorMeta },
}

/// Aggregated result of one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub chat_id: String,
    pub messages_appended: usize,
    pub failed: bool,
    pub error: Option<ErrorMeta>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry points
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn on a spawned task; the caller reads [`TurnEvent`]s from
/// the returned channel as they arrive (SSE streaming).
pub fn run_turn(engine: Arc<Engine>, req: ProcessRequest) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    tokio::spawn(async move {
        let outcome = run_turn_inner(&engine, req, &tx).await;
        tracing::debug!(
            chat_id = %outcome.chat_id,
            failed = outcome.failed,
            "turn finished"
        );
    });
    rx
}

/// Run one turn inline and return the aggregated outcome. Events are
/// discarded.
pub async fn run_turn_collect(engine: &Engine, req: ProcessRequest) -> TurnOutcome {
    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    drop(rx); // sends become no-ops
    run_turn_inner(engine, req, &tx).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accumulates the observable artifacts of a turn: the aggregated reply,
/// the interleaved timeline, and the raw tool notices for metadata.
struct TurnRecorder {
    reply: String,
    timeline: Vec<TimelineEntry>,
    notices: Vec<Value>,
    order: u32,
    text_order: u32,
    tool_order: u32,
}

impl TurnRecorder {
    fn new() -> Self {
        Self {
            reply: String::new(),
            timeline: Vec::new(),
            notices: Vec::new(),
            order: 0,
            text_order: 0,
            tool_order: 0,
        }
    }

    fn record_text_run(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.reply.push_str(text);
        self.timeline.push(TimelineEntry::TextRun {
            order: self.order,
            text: text.to_string(),
        });
        self.order += 1;
        self.text_order += 1;
    }

    fn record_tool(&mut self, name: &str, ok: bool, summary: &str) {
        self.timeline.push(TimelineEntry::ToolCall {
            order: self.order,
            name: name.to_string(),
            ok,
            summary: summary.to_string(),
        });
        self.order += 1;
        self.tool_order += 1;
    }

    fn record_notice(&mut self, event: &TurnEvent) {
        if let Ok(v) = serde_json::to_value(event) {
            self.notices.push(v);
        }
    }

    /// Build the assistant message this turn settles into.
    fn into_assistant_message(self, failed: Option<&ErrorMeta>) -> ChatMessage {
        let mut msg = ChatMessage::new(
            Role::Assistant,
            vec![ContentPart::Text {
                text: self.reply.clone(),
            }],
        );
        msg.metadata.insert(
            "timeline".into(),
            serde_json::to_value(&self.timeline).unwrap_or_default(),
        );
        msg.metadata
            .insert("tool_call_notices".into(), Value::Array(self.notices));
        msg.metadata
            .insert("text_order".into(), Value::from(self.text_order));
        msg.metadata
            .insert("tool_order".into(), Value::from(self.tool_order));
        if let Some(meta) = failed {
            msg.metadata.insert("failed".into(), Value::Bool(true));
            msg.metadata.insert(
                "error".into(),
                serde_json::json!({ "code": meta.code, "message": meta.message }),
            );
        }
        msg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner — the loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    engine: &Engine,
    req: ProcessRequest,
    tx: &mpsc::Sender<TurnEvent>,
) -> TurnOutcome {
    // Providers are snapshotted at the start of the turn: hot edits to
    // provider settings do not affect in-flight turns.
    let resolved = engine.store.read(|doc| {
        let setting = doc.providers.get(&doc.active_llm.provider_id).cloned();
        (doc.active_llm.clone(), setting)
    });
    let adapter = resolve_adapter(&resolved.0, resolved.1.as_ref());

    run_turn_with_adapter(engine, req, tx, adapter).await
}

/// The loop proper, with the adapter injected (tests pass mocks here).
pub(crate) async fn run_turn_with_adapter(
    engine: &Engine,
    req: ProcessRequest,
    tx: &mpsc::Sender<TurnEvent>,
    adapter: nx_domain::error::Result<(Arc<dyn ChatAdapter>, String)>,
) -> TurnOutcome {
    let chat = match engine
        .chats
        .resolve_or_create(&req.user_id, &req.channel, &req.session_id)
    {
        Ok(c) => c,
        Err(e) => {
            let meta = error_meta(&e);
            let _ = tx
                .send(TurnEvent::Error { meta: meta.clone() })
                .await;
            return TurnOutcome {
                reply: String::new(),
                chat_id: String::new(),
                messages_appended: 0,
                failed: true,
                error: Some(meta),
            };
        }
    };

    let mut recorder = TurnRecorder::new();

    // ── Forced tool invocation: no provider involved ─────────────────
    if let Some(forced) = req.biz_params.tool.clone() {
        let step = 1;
        let _ = tx.send(TurnEvent::StepStarted { step }).await;
        let (event_call, event_result, summary, ok) =
            dispatch_one_tool(engine, step, &forced.name, &forced.input).await;
        let _ = tx.send(event_call.clone()).await;
        recorder.record_notice(&event_call);
        let _ = tx.send(event_result.clone()).await;
        recorder.record_notice(&event_result);
        recorder.record_tool(&forced.name, ok, &summary);
        recorder.record_text_run(&summary);

        let reply = recorder.reply.clone();
        let appended = persist_turn(engine, &chat.id, &req, recorder, None);
        let _ = tx
            .send(TurnEvent::Completed {
                reply: reply.clone(),
            })
            .await;
        return TurnOutcome {
            reply,
            chat_id: chat.id,
            messages_appended: appended,
            failed: false,
            error: None,
        };
    }

    let (adapter, model) = match adapter {
        Ok(pair) => pair,
        Err(e) => {
            return fail_turn(engine, &chat.id, &req, recorder, &e, tx).await;
        }
    };

    // ── Conversation assembly ────────────────────────────────────────
    let mut messages: Vec<Message> = Vec::new();
    messages.push(Message::system(prompts::system_prompt(req.prompt_mode())));
    messages.extend(history_messages(engine, &chat.id));
    for input in &req.input {
        messages.push(Message {
            role: input.role,
            content: input.content.clone(),
        });
    }

    let tool_defs = engine.tools.definitions();
    let max_steps = req.max_steps();

    // ── The loop ─────────────────────────────────────────────────────
    for step in 1..=max_steps {
        let _ = tx.send(TurnEvent::StepStarted { step }).await;

        let provider_req = TurnRequest {
            model: model.clone(),
            messages: messages.clone(),
            tools: tool_defs.clone(),
        };

        let mut stream = match adapter.generate_stream(&provider_req).await {
            Ok(s) => s,
            Err(e) => return fail_turn(engine, &chat.id, &req, recorder, &e, tx).await,
        };

        let mut step_text = String::new();
        // index -> (call_id, tool_name, argument fragments)
        let mut fragments: BTreeMap<u32, (String, String, String)> = BTreeMap::new();

        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::Token { text }) => {
                    let _ = tx
                        .send(TurnEvent::AssistantDelta {
                            step,
                            delta: text.clone(),
                        })
                        .await;
                    step_text.push_str(&text);
                }
                Ok(StreamEvent::ToolCallStarted {
                    index,
                    call_id,
                    tool_name,
                }) => {
                    fragments.insert(index, (call_id, tool_name, String::new()));
                }
                Ok(StreamEvent::ToolCallDelta { index, delta }) => {
                    fragments
                        .entry(index)
                        .or_insert_with(|| (String::new(), String::new(), String::new()))
                        .2
                        .push_str(&delta);
                }
                Ok(StreamEvent::Done { .. }) => break,
                Err(e) => {
                    recorder.record_text_run(&step_text);
                    return fail_turn(engine, &chat.id, &req, recorder, &e, tx).await;
                }
            }
        }

        recorder.record_text_run(&step_text);

        // Assemble full tool calls from the index-keyed fragments.
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for (index, (call_id, tool_name, raw_args)) in fragments {
            match parse_tool_arguments(index as usize, &tool_name, &raw_args) {
                Ok(arguments) => tool_calls.push(ToolCall {
                    call_id: if call_id.is_empty() {
                        format!("call_{index}")
                    } else {
                        call_id
                    },
                    tool_name,
                    arguments,
                }),
                Err(e) => {
                    return fail_turn(engine, &chat.id, &req, recorder, &e, tx).await;
                }
            }
        }

        // Text-only completion ends the turn.
        if tool_calls.is_empty() {
            let reply = recorder.reply.clone();
            let appended = persist_turn(engine, &chat.id, &req, recorder, None);
            let _ = tx
                .send(TurnEvent::Completed {
                    reply: reply.clone(),
                })
                .await;
            return TurnOutcome {
                reply,
                chat_id: chat.id,
                messages_appended: appended,
                failed: false,
                error: None,
            };
        }

        // ── Tool dispatch ────────────────────────────────────────────
        messages.push(Message::assistant_tool_calls(&step_text, &tool_calls));

        for tc in &tool_calls {
            let (event_call, event_result, summary, ok) =
                dispatch_one_tool(engine, step, &tc.tool_name, &tc.arguments).await;
            let _ = tx.send(event_call.clone()).await;
            recorder.record_notice(&event_call);
            let _ = tx.send(event_result.clone()).await;
            recorder.record_notice(&event_result);
            recorder.record_tool(&tc.tool_name, ok, &summary);

            messages.push(Message::tool_result(&tc.call_id, &summary, !ok));
        }
    }

    // Budget exhausted while the provider still wanted tools.
    let e = Error::Internal(format!("step budget exceeded ({max_steps} steps)"));
    let meta = ErrorMeta {
        code: "step_budget_exceeded".into(),
        message: e.to_string(),
    };
    fail_turn_with_meta(engine, &chat.id, &req, recorder, meta, tx).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn error_meta(e: &Error) -> ErrorMeta {
    ErrorMeta {
        code: e.code(),
        message: e.to_string(),
    }
}

/// Prior chat history as provider messages. Tool traces are not
/// replayed; the aggregated assistant text carries the outcome.
fn history_messages(engine: &Engine, chat_id: &str) -> Vec<Message> {
    let history = engine.chats.history(chat_id).unwrap_or_default();
    history
        .iter()
        .filter_map(|m| {
            let text = nx_domain::message::join_text_parts(&m.content);
            if text.is_empty() {
                return None;
            }
            match m.role {
                Role::User => Some(Message::user(text)),
                Role::Assistant => Some(Message::assistant(text)),
                _ => None,
            }
        })
        .collect()
}

/// Invoke one tool and build the `tool_call` / `tool_result` event pair.
/// Tool failures never abort the turn; they surface as `ok = false`.
async fn dispatch_one_tool(
    engine: &Engine,
    step: u32,
    name: &str,
    input: &Value,
) -> (TurnEvent, TurnEvent, String, bool) {
    let event_call = TurnEvent::ToolCall {
        step,
        tool_call: ToolCallNotice {
            name: name.to_string(),
            input: input.clone(),
        },
    };

    let (ok, summary) = match engine.tools.dispatch(name, input).await {
        Ok(v) => {
            let ok = v.get("ok").and_then(Value::as_bool).unwrap_or(true);
            (ok, truncate_str(&nx_tools::render_text(&v), SUMMARY_MAX_CHARS))
        }
        Err(e) => {
            tracing::debug!(tool = name, error = %e, "tool dispatch failed");
            (false, truncate_str(&e.to_string(), SUMMARY_MAX_CHARS))
        }
    };

    let event_result = TurnEvent::ToolResult {
        step,
        tool_result: ToolResultNotice {
            name: name.to_string(),
            ok,
            summary: summary.clone(),
        },
    };

    (event_call, event_result, summary, ok)
}

/// Persist the turn: the request's input messages, then one assistant
/// message carrying the aggregated text and the timeline metadata.
/// Returns the number of messages appended.
fn persist_turn(
    engine: &Engine,
    chat_id: &str,
    req: &ProcessRequest,
    recorder: TurnRecorder,
    failed: Option<&ErrorMeta>,
) -> usize {
    let mut batch: Vec<ChatMessage> = req
        .input
        .iter()
        .map(|m| ChatMessage::new(m.role, m.content.clone()))
        .collect();
    batch.push(recorder.into_assistant_message(failed));
    let count = batch.len();

    if let Err(e) = engine.chats.append_messages(chat_id, batch) {
        tracing::error!(chat_id, error = %e, "failed to persist turn");
        return 0;
    }
    count
}

/// Settle a failed turn: emit the error event and persist the partial
/// assistant message with `failed = true`.
async fn fail_turn(
    engine: &Engine,
    chat_id: &str,
    req: &ProcessRequest,
    recorder: TurnRecorder,
    e: &Error,
    tx: &mpsc::Sender<TurnEvent>,
) -> TurnOutcome {
    fail_turn_with_meta(engine, chat_id, req, recorder, error_meta(e), tx).await
}

async fn fail_turn_with_meta(
    engine: &Engine,
    chat_id: &str,
    req: &ProcessRequest,
    recorder: TurnRecorder,
    meta: ErrorMeta,
    tx: &mpsc::Sender<TurnEvent>,
) -> TurnOutcome {
    let reply = recorder.reply.clone();
    let appended = persist_turn(engine, chat_id, req, recorder, Some(&meta));
    let _ = tx
        .send(TurnEvent::Error { meta: meta.clone() })
        .await;
    TurnOutcome {
        reply,
        chat_id: chat_id.to_string(),
        messages_appended: appended,
        failed: true,
        error: Some(meta),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
