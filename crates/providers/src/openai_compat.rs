//! OpenAI-compatible adapter.
//!
//! Works with any endpoint that follows the chat completions contract:
//! `POST {base_url}/chat/completions` with `model`, `messages`, optional
//! `tools` (JSON-schema function definitions), and `stream`. Replies may
//! carry string-shaped or array-shaped `content`; both parse.

use std::collections::HashMap;

use serde_json::Value;

use crate::adapter::{ChatAdapter, TurnCompletion, TurnRequest};
use nx_domain::error::{Error, Result};
use nx_domain::message::{ContentPart, Message, Role, ToolCall};
use nx_domain::state::ProviderSetting;
use nx_domain::stream::{BoxStream, StreamEvent};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatAdapter {
    provider_id: String,
    base_url: String,
    api_key: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(provider_id: &str, setting: &ProviderSetting) -> Result<Self> {
        let base_url = if setting.base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            setting.base_url.trim_end_matches('/').to_string()
        };

        let timeout = std::time::Duration::from_millis(
            setting.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ProviderRequestFailed(format!("building client: {e}")))?;

        Ok(Self {
            provider_id: provider_id.to_string(),
            base_url,
            api_key: setting.api_key.clone(),
            headers: setting.headers.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        builder
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_chat_body(&self, req: &TurnRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for part in &msg.content {
        match part {
            ContentPart::Text { text } => text_parts.push(text.clone()),
            ContentPart::ToolUse { id, name, input } => {
                tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    }
                }));
            }
            ContentPart::ToolResult { .. } => {}
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    for part in &msg.content {
        if let ContentPart::ToolResult {
            tool_use_id,
            content,
            ..
        } = part
        {
            return serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_use_id,
                "content": content,
            });
        }
    }
    serde_json::json!({"role": "tool", "tool_call_id": "", "content": msg.extract_all_text()})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replies carry `content` as either a plain string or an array of
/// `{type:"text", text}` parts; normalize both to one string.
fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| {
                p.get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn parse_chat_response(body: &Value) -> Result<TurnCompletion> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::ProviderInvalidReply("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::ProviderInvalidReply("no message in choice".into()))?;

    let text = message
        .get("content")
        .map(content_to_text)
        .unwrap_or_default();

    let tool_calls = parse_tool_calls(message)?;

    if text.is_empty() && tool_calls.is_empty() {
        return Err(Error::ProviderInvalidReply("empty content".into()));
    }

    Ok(TurnCompletion { text, tool_calls })
}

fn parse_tool_calls(message: &Value) -> Result<Vec<ToolCall>> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Ok(Vec::new()),
    };

    let mut calls = Vec::with_capacity(arr.len());
    for (index, tc) in arr.iter().enumerate() {
        let call_id = tc
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let func = tc.get("function").cloned().unwrap_or(Value::Null);
        let tool_name = func
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let raw_args = func
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");

        let arguments = parse_tool_arguments(index, &tool_name, raw_args)?;
        calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }
    Ok(calls)
}

/// Tool-call arguments must parse as a JSON object. Malformed arguments
/// are an invalid reply, with the call index, name, raw payload, and
/// parse cause preserved for diagnosis.
///
/// Also used by the turn engine to finalize streamed argument fragments.
pub fn parse_tool_arguments(index: usize, name: &str, raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(other) => Err(Error::ProviderInvalidReply(format!(
            "tool_call[{index}] '{name}': arguments are not an object: {other}"
        ))),
        Err(e) => Err(Error::ProviderInvalidReply(format!(
            "tool_call[{index}] '{name}': malformed arguments {raw:?}: {e}"
        ))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one streamed `data:` payload into stream events.
///
/// Tool-call fragments stream keyed by `index`; the first fragment of a
/// call carries `id` and `function.name`, later fragments only append
/// `function.arguments` text.
fn parse_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            finish_reason: Some("stop".into()),
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(Error::ProviderRequestFailed(format!(
                "malformed stream chunk: {e}"
            )))]
        }
    };

    let choice = match v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    {
        Some(c) => c,
        None => return Vec::new(),
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

            if let Some(name) = tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
            {
                let call_id = tc
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                events.push(Ok(StreamEvent::ToolCallStarted {
                    index,
                    call_id,
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                if !args.is_empty() {
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        index,
                        delta: args.to_string(),
                    }));
                }
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.push(Ok(StreamEvent::Done {
            finish_reason: Some(fr.to_string()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatAdapter for OpenAiCompatAdapter {
    fn adapter_id(&self) -> &str {
        "openai_compat"
    }

    async fn generate(&self, req: &TurnRequest) -> Result<TurnCompletion> {
        let url = self.chat_url();
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.provider_id, url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderRequestFailed(e.to_string()))?;

        let status = resp.status();
        let resp_text = resp
            .text()
            .await
            .map_err(|e| Error::ProviderRequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::ProviderRequestFailed(format!(
                "HTTP {} - {}",
                status.as_u16(),
                resp_text
            )));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)
            .map_err(|e| Error::ProviderRequestFailed(format!("decoding reply: {e}")))?;
        parse_chat_response(&resp_json)
    }

    async fn generate_stream(
        &self,
        req: &TurnRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url();
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.provider_id, url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ProviderRequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp
                .text()
                .await
                .map_err(|e| Error::ProviderRequestFailed(e.to_string()))?;
            return Err(Error::ProviderRequestFailed(format!(
                "HTTP {} - {}",
                status.as_u16(),
                err_text
            )));
        }

        Ok(crate::sse::sse_response_stream(resp, parse_sse_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_content() {
        let body = serde_json::json!({
            "choices": [{ "message": { "content": "hello" } }]
        });
        let out = parse_chat_response(&body).unwrap();
        assert_eq!(out.text, "hello");
        assert!(out.tool_calls.is_empty());
    }

    #[test]
    fn parses_array_content() {
        let body = serde_json::json!({
            "choices": [{ "message": { "content": [
                { "type": "text", "text": "hel" },
                { "type": "text", "text": "lo" }
            ] } }]
        });
        let out = parse_chat_response(&body).unwrap();
        assert_eq!(out.text, "hello");
    }

    #[test]
    fn no_choices_is_invalid_reply() {
        let body = serde_json::json!({ "choices": [] });
        let err = parse_chat_response(&body).unwrap_err();
        assert_eq!(err.code(), "provider_invalid_reply");
    }

    #[test]
    fn empty_content_without_tool_calls_is_invalid_reply() {
        let body = serde_json::json!({
            "choices": [{ "message": { "content": "" } }]
        });
        let err = parse_chat_response(&body).unwrap_err();
        assert_eq!(err.code(), "provider_invalid_reply");
    }

    #[test]
    fn parses_tool_calls() {
        let body = serde_json::json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "shell", "arguments": "{\"items\":[{\"command\":\"pwd\"}]}" }
                }]
            } }]
        });
        let out = parse_chat_response(&body).unwrap();
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].tool_name, "shell");
        assert!(out.tool_calls[0].arguments.get("items").is_some());
    }

    #[test]
    fn malformed_tool_arguments_preserve_index_and_name() {
        let err = parse_tool_arguments(2, "shell", "{not json").unwrap_err();
        assert_eq!(err.code(), "provider_invalid_reply");
        let msg = err.to_string();
        assert!(msg.contains("tool_call[2]"));
        assert!(msg.contains("shell"));
        assert!(msg.contains("{not json"));
    }

    #[test]
    fn non_object_tool_arguments_rejected() {
        let err = parse_tool_arguments(0, "shell", "[1,2]").unwrap_err();
        assert_eq!(err.code(), "provider_invalid_reply");
    }

    #[test]
    fn empty_tool_arguments_default_to_object() {
        let v = parse_tool_arguments(0, "shell", "").unwrap();
        assert_eq!(v, serde_json::json!({}));
    }

    #[test]
    fn stream_parses_token_delta() {
        let events = parse_sse_data(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(events.len(), 1);
        match events[0].as_ref().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "Hel"),
            other => panic!("expected token, got {other:?}"),
        }
    }

    #[test]
    fn stream_parses_done_sentinel() {
        let events = parse_sse_data("[DONE]");
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { .. }
        ));
    }

    #[test]
    fn stream_parses_tool_call_start_and_delta() {
        let events = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"shell","arguments":"{\"it"}}]}}]}"#,
        );
        assert_eq!(events.len(), 2);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolCallStarted {
                index,
                call_id,
                tool_name,
            } => {
                assert_eq!(*index, 0);
                assert_eq!(call_id, "call_1");
                assert_eq!(tool_name, "shell");
            }
            other => panic!("expected started, got {other:?}"),
        }
        match events[1].as_ref().unwrap() {
            StreamEvent::ToolCallDelta { index, delta } => {
                assert_eq!(*index, 0);
                assert_eq!(delta, "{\"it");
            }
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn stream_parses_argument_fragment_without_name() {
        let events = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ems\":[]}"}}]}}]}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta { .. }
        ));
    }

    #[test]
    fn stream_finish_reason_emits_done() {
        let events = parse_sse_data(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { finish_reason } => {
                assert_eq!(finish_reason.as_deref(), Some("tool_calls"));
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn assistant_message_serializes_tool_calls() {
        let msg = Message::assistant_tool_calls(
            "",
            &[ToolCall {
                call_id: "c1".into(),
                tool_name: "shell".into(),
                arguments: serde_json::json!({"items": []}),
            }],
        );
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "assistant");
        assert!(v["content"].is_null());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "shell");
    }

    #[test]
    fn tool_result_message_serializes_call_id() {
        let msg = Message::tool_result("c1", "/home", false);
        let v = msg_to_openai(&msg);
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c1");
        assert_eq!(v["content"], "/home");
    }
}
