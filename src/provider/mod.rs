//! Chat backend interface and the OpenAI-compatible adapter.

pub mod capabilities;
pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{json, Map, Value};

use crate::error::StrandError;
use crate::tools::ToolSpec;
use crate::types::{Message, StreamEvent};

pub use capabilities::{CapabilityTable, EndpointClass, StreamPlan, StreamStrategy};
#[cfg(feature = "openai")]
pub use openai::{normalize_base_url, OpenAiCompatibleBackend};

/// Events of one backend stream. Finite, ends with exactly one
/// [`StreamEvent::Done`] unless an error item ends it first.
pub type EventStream = BoxStream<'static, Result<StreamEvent, StrandError>>;

/// One chat-completion request.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[builder(default)]
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Extra top-level body fields; these override generated ones.
    #[builder(default)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Request body for `model`.
    pub fn to_wire_body(&self, model: &str, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(model));
        body.insert(
            "messages".into(),
            Value::Array(self.messages.iter().map(Message::to_wire).collect()),
        );
        if stream {
            body.insert("stream".into(), Value::Bool(true));
        }
        if !self.tools.is_empty() {
            body.insert(
                "tools".into(),
                Value::Array(self.tools.iter().map(ToolSpec::to_wire).collect()),
            );
        }
        if let Some(temperature) = self.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        for (key, value) in &self.extra {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

/// Result of a single-shot completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatResponse {
    pub output_text: String,
    pub finish_reason: Option<String>,
}

/// A remote chat model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Endpoint identity, used with [`model_id`](Self::model_id) to key
    /// per-backend state.
    fn endpoint(&self) -> &str;

    fn model_id(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StrandError>;

    /// Start a lazy event stream. Nothing is sent until the stream is polled.
    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, StrandError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParameterBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_body_includes_only_set_fields() {
        let request = ChatRequest::new(vec![Message::user("hi")]);
        assert_eq!(
            request.to_wire_body("m", false),
            json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
    }

    #[test]
    fn wire_body_with_tools_and_extra() {
        let mut extra = Map::new();
        extra.insert("top_p".into(), json!(0.5));
        let request = ChatRequest::builder()
            .messages(vec![Message::user("hi")])
            .tools(vec![ToolSpec::new("calc", "Calculator", ParameterBuilder::empty())])
            .temperature(0.0)
            .max_tokens(64)
            .extra(extra)
            .build();
        let body = request.to_wire_body("m", true);
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["tools"][0]["function"]["name"], json!("calc"));
        assert_eq!(body["temperature"], json!(0.0));
        assert_eq!(body["max_tokens"], json!(64));
        assert_eq!(body["top_p"], json!(0.5));
    }
}
