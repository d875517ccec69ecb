use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a provider streams a completion.
///
/// Tool-call arguments arrive as fragments keyed by the provider's call
/// index; the turn engine concatenates them in index order and parses the
/// final JSON once the stream finishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call has started at `index`.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted {
        index: u32,
        call_id: String,
        tool_name: String,
    },

    /// Incremental tool call argument data for the call at `index`.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { index: u32, delta: String },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done { finish_reason: Option<String> },
}
