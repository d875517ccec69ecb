//! The adapter contract every provider implements.

use nx_domain::error::Result;
use nx_domain::message::{Message, ToolCall, ToolDefinition};
use nx_domain::stream::{BoxStream, StreamEvent};

/// One provider call: the conversation so far plus the tool surface.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Aggregated result of one provider call.
#[derive(Debug, Clone, Default)]
pub struct TurnCompletion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// A chat-completions-shaped upstream.
///
/// `generate` blocks until the full completion is available;
/// `generate_stream` yields [`StreamEvent`]s as they arrive. Tool-call
/// argument fragments stream keyed by index and are assembled by the
/// caller (the turn engine) once `Done` is seen.
#[async_trait::async_trait]
pub trait ChatAdapter: Send + Sync {
    fn adapter_id(&self) -> &str;

    async fn generate(&self, req: &TurnRequest) -> Result<TurnCompletion>;

    async fn generate_stream(
        &self,
        req: &TurnRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

impl std::fmt::Debug for dyn ChatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAdapter")
            .field("adapter_id", &self.adapter_id())
            .finish()
    }
}
