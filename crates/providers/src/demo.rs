//! Demo adapter — deterministic echo of the user's text.
//!
//! Selected whenever no provider is configured, so the gateway stays
//! fully exercisable without upstream credentials. Never produces
//! tool calls.

use crate::adapter::{ChatAdapter, TurnCompletion, TurnRequest};
use nx_domain::error::Result;
use nx_domain::message::Role;
use nx_domain::stream::{BoxStream, StreamEvent};

pub struct DemoAdapter;

impl DemoAdapter {
    fn echo(req: &TurnRequest) -> String {
        let joined = req
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.extract_all_text())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        format!("Echo: {joined}")
    }
}

#[async_trait::async_trait]
impl ChatAdapter for DemoAdapter {
    fn adapter_id(&self) -> &str {
        "demo"
    }

    async fn generate(&self, req: &TurnRequest) -> Result<TurnCompletion> {
        Ok(TurnCompletion {
            text: Self::echo(req),
            tool_calls: Vec::new(),
        })
    }

    async fn generate_stream(
        &self,
        req: &TurnRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let text = Self::echo(req);
        let stream = async_stream::stream! {
            yield Ok(StreamEvent::Token { text });
            yield Ok(StreamEvent::Done {
                finish_reason: Some("stop".into()),
            });
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use nx_domain::message::Message;

    fn req(texts: &[&str]) -> TurnRequest {
        TurnRequest {
            model: String::new(),
            messages: texts.iter().map(|t| Message::user(*t)).collect(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn echoes_single_user_message() {
        let out = DemoAdapter.generate(&req(&["hi"])).await.unwrap();
        assert_eq!(out.text, "Echo: hi");
        assert!(out.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn joins_multiple_user_messages() {
        let out = DemoAdapter.generate(&req(&["one", "two"])).await.unwrap();
        assert_eq!(out.text, "Echo: one\ntwo");
    }

    #[tokio::test]
    async fn ignores_system_messages() {
        let mut r = req(&["hi"]);
        r.messages.insert(0, Message::system("you are a bot"));
        let out = DemoAdapter.generate(&r).await.unwrap();
        assert_eq!(out.text, "Echo: hi");
    }

    #[tokio::test]
    async fn stream_yields_token_then_done() {
        let mut stream = DemoAdapter.generate_stream(&req(&["hi"])).await.unwrap();
        match stream.next().await.unwrap().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "Echo: hi"),
            other => panic!("expected token, got {other:?}"),
        }
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Done { .. }
        ));
        assert!(stream.next().await.is_none());
    }
}
