//! Adapter for OpenAI-style chat-completion endpoints.

mod chunk;
mod stream;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::capabilities::CapabilityTable;
use super::http::{bearer_headers, build_client, status_to_error};
use super::{ChatBackend, ChatRequest, ChatResponse, EventStream};
use crate::config::BackendConfig;
use crate::error::StrandError;
use crate::util::RetryPolicy;
use stream::StreamContext;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Normalize a user-supplied endpoint root.
///
/// Trims whitespace and trailing slashes, and appends `/v1` to a bare
/// `scheme://host[:port]`. Input without a scheme and host is returned as-is.
pub fn normalize_base_url(base_url: &str) -> String {
    let raw = base_url.trim().trim_end_matches('/');
    if raw.is_empty() {
        return String::new();
    }
    match reqwest::Url::parse(raw) {
        Ok(url) if url.has_host() && matches!(url.path(), "" | "/") => format!("{raw}/v1"),
        _ => raw.to_string(),
    }
}

/// Chat backend for OpenAI and protocol-compatible gateways.
pub struct OpenAiCompatibleBackend {
    config: BackendConfig,
    base_url: String,
    client: reqwest::Client,
    capabilities: CapabilityTable,
    retry: RetryPolicy,
}

impl OpenAiCompatibleBackend {
    pub fn new(config: BackendConfig) -> Result<Self, StrandError> {
        let base_url = match normalize_base_url(&config.base_url) {
            url if url.is_empty() => DEFAULT_BASE_URL.to_string(),
            url => url,
        };
        let client = build_client(config.timeout())?;
        let retry = RetryPolicy::with_max_retries(config.max_retries);
        Ok(Self {
            config,
            base_url,
            client,
            capabilities: CapabilityTable::default(),
            retry,
        })
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityTable) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn headers(&self) -> HeaderMap {
        bearer_headers(&self.config.api_key)
    }

    fn request_timeout(&self) -> Duration {
        self.config.timeout()
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<Value>,
}

fn content_text(content: Option<Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StrandError> {
        let body = request.to_wire_body(&self.config.model, false);
        let url = self.chat_url();
        debug!(model = %self.config.model, "chat completion");

        let (body, url) = (&body, &url);
        self.retry
            .execute(|| async move {
                let resp = self
                    .client
                    .post(url)
                    .headers(self.headers())
                    .timeout(self.request_timeout())
                    .json(body)
                    .send()
                    .await?;

                let status = resp.status();
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(status_to_error(status.as_u16(), &text));
                }

                let data: CompletionResponse = resp.json().await?;
                let Some(choice) = data.choices.into_iter().next() else {
                    return Ok(ChatResponse::default());
                };
                Ok(ChatResponse {
                    output_text: content_text(choice.message.and_then(|m| m.content)),
                    finish_reason: choice.finish_reason.filter(|r| !r.is_empty()),
                })
            })
            .await
    }

    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, StrandError> {
        let plan = self.capabilities.plan_for_url(&self.config.base_url);
        debug!(
            model = %self.config.model,
            preferred = %plan.preferred,
            fallback = ?plan.fallback,
            "chat stream"
        );
        let ctx = StreamContext {
            client: self.client.clone(),
            url: self.chat_url(),
            headers: self.headers(),
            body: request.to_wire_body(&self.config.model, true),
            retry: self.retry.clone(),
        };
        Ok(stream::event_stream(ctx, plan))
    }
}
