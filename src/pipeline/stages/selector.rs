//! Model-assisted tool selection with caching and a cooldown breaker.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::last_user_text;
use crate::config::SelectorConfig;
use crate::error::Result;
use crate::pipeline::{PipelineRequest, PipelineStage, StageResult};
use crate::provider::{ChatBackend, ChatRequest};
use crate::tools::ToolSpec;
use crate::types::{Message, Role};
use crate::util::json::extract_json_snippet;
use crate::util::text::take_chars;
use crate::util::{with_timeout, CooldownBreaker, TtlLruCache};

pub const DEFAULT_SELECTOR_PROMPT: &str =
    "Your goal is to select the most relevant tools for answering the user's query.";

const CACHE_KEY_TEXT_CHARS: usize = 500;
const MIN_SELECTOR_TOKENS: u32 = 32;

type CacheKey = [u8; 32];
type BreakerKey = (String, String);

/// Selection cache and failure breaker shared between selector stages.
///
/// Inject one instance into every stage that should share state, or use
/// [`ToolSelectorState::shared`] for the process-wide default.
pub struct ToolSelectorState {
    cache: TtlLruCache<CacheKey, Vec<String>>,
    breaker: CooldownBreaker<BreakerKey>,
}

impl std::fmt::Debug for ToolSelectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSelectorState")
            .field("cached", &self.cache.len())
            .field("open_breakers", &self.breaker.len())
            .finish()
    }
}

impl ToolSelectorState {
    pub fn new(cache_size: usize, cache_ttl: Option<Duration>) -> Self {
        Self {
            cache: TtlLruCache::new(cache_size, cache_ttl),
            breaker: CooldownBreaker::new(),
        }
    }

    pub fn from_config(config: &SelectorConfig) -> Self {
        Self::new(config.cache_size, config.cache_ttl())
    }

    /// Process-wide state, created with default sizing on first use.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<ToolSelectorState>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(Self::from_config(&SelectorConfig::default())))
            .clone()
    }

    pub fn cached_selections(&self) -> usize {
        self.cache.len()
    }

    /// Whether selection is cooling down for `endpoint`/`model`.
    pub fn is_disabled(&self, endpoint: &str, model: &str) -> bool {
        self.breaker
            .is_open(&(endpoint.to_string(), model.to_string()))
    }

    pub fn clear(&self) {
        self.cache.clear();
        self.breaker.clear();
    }
}

/// Asks a chat backend which tools matter for the last user message.
///
/// Fails open: errors, timeouts and unparseable replies keep the current
/// tool list and trip the breaker for the backend endpoint and model.
pub struct ToolLlmSelectorStage {
    backend: Arc<dyn ChatBackend>,
    state: Arc<ToolSelectorState>,
    max_tools: usize,
    min_tools: usize,
    always_include: Vec<String>,
    system_prompt: String,
    timeout: Duration,
    cooldown: Duration,
    max_tokens: u32,
}

#[bon::bon]
impl ToolLlmSelectorStage {
    #[builder]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        state: Arc<ToolSelectorState>,
        #[builder(default = 4)] max_tools: usize,
        #[builder(default = 16)] min_tools: usize,
        #[builder(default)] always_include: Vec<String>,
        #[builder(into, default = DEFAULT_SELECTOR_PROMPT.to_string())] system_prompt: String,
        #[builder(default = Duration::from_secs(4))] timeout: Duration,
        #[builder(default = Duration::from_secs(300))] cooldown: Duration,
        #[builder(default = 256)] max_tokens: u32,
    ) -> Self {
        Self {
            backend,
            state,
            max_tools: max_tools.max(1),
            min_tools,
            always_include: always_include
                .into_iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            system_prompt,
            timeout,
            cooldown,
            max_tokens: max_tokens.max(MIN_SELECTOR_TOKENS),
        }
    }
}

impl ToolLlmSelectorStage {
    pub fn from_config(
        config: &SelectorConfig,
        backend: Arc<dyn ChatBackend>,
        state: Arc<ToolSelectorState>,
    ) -> Self {
        Self::builder()
            .backend(backend)
            .state(state)
            .max_tools(config.max_tools)
            .min_tools(config.min_tools)
            .always_include(config.always_include.clone())
            .system_prompt(
                config
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SELECTOR_PROMPT.to_string()),
            )
            .timeout(config.timeout())
            .cooldown(config.cooldown())
            .max_tokens(config.max_tokens)
            .build()
    }

    fn breaker_key(&self) -> BreakerKey {
        (
            self.backend.endpoint().trim().to_string(),
            self.backend.model_id().trim().to_string(),
        )
    }

    fn trip(&self) {
        self.state.breaker.trip(self.breaker_key(), self.cooldown);
    }

    fn instructions(&self, names: &[&str]) -> String {
        let listed = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
        format!(
            "{}\nSelect at most {} tools.\nReturn JSON: {{\"tools\": [\"tool_name\", ...]}}\nOnly choose from the provided tool names.\nTool names: {listed}",
            self.system_prompt, self.max_tools
        )
    }

    async fn ask(&self, user_text: &str, names: &[&str]) -> Result<Option<Vec<String>>> {
        if names.is_empty() {
            return Ok(None);
        }
        let request = ChatRequest::builder()
            .messages(vec![
                Message::system(self.instructions(names)),
                Message::user(user_text),
            ])
            .temperature(0.0)
            .max_tokens(self.max_tokens)
            .build();
        let response = with_timeout(self.timeout, self.backend.complete(&request)).await?;
        Ok(parse_selection(&response.output_text))
    }

    /// Valid, unique names up to `max_tools`, in tool-list order, then the
    /// always-included tools.
    fn apply_selection(&self, tools: &[ToolSpec], selection: &[String]) -> Vec<ToolSpec> {
        let valid: HashSet<&str> = tools.iter().map(|tool| tool.name.trim()).collect();
        let mut chosen: Vec<&str> = Vec::new();
        for name in selection.iter().map(|name| name.trim()) {
            if name.is_empty() || !valid.contains(name) || chosen.contains(&name) {
                continue;
            }
            if chosen.len() >= self.max_tools {
                break;
            }
            chosen.push(name);
        }

        let mut filtered: Vec<ToolSpec> = tools
            .iter()
            .filter(|tool| chosen.contains(&tool.name.trim()))
            .cloned()
            .collect();
        filtered.extend(
            tools
                .iter()
                .filter(|tool| {
                    let name = tool.name.trim();
                    self.always_include.iter().any(|always| always == name)
                        && !chosen.contains(&name)
                })
                .cloned(),
        );
        filtered
    }
}

/// Parse `{"tools": [...]}` or a bare array out of model prose.
fn parse_selection(text: &str) -> Option<Vec<String>> {
    let snippet = extract_json_snippet(text).unwrap_or_else(|| text.trim());
    if snippet.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(snippet).ok()?;
    let items = match value {
        Value::Object(mut object) => match object.remove("tools")? {
            Value::Array(items) => items,
            _ => return None,
        },
        Value::Array(items) => items,
        _ => return None,
    };

    let mut selected: Vec<String> = Vec::new();
    for item in items {
        let name = match item {
            Value::String(name) => name.trim().to_string(),
            other => other.to_string(),
        };
        if !name.is_empty() && !selected.contains(&name) {
            selected.push(name);
        }
    }
    Some(selected)
}

fn cache_key(user_text: &str, names: &[&str]) -> CacheKey {
    let normalized = user_text.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(take_chars(&normalized, CACHE_KEY_TEXT_CHARS).as_bytes());
    for name in names {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
    }
    hasher.finalize().into()
}

/// The latest non-system message is from the user.
fn last_turn_is_user(messages: &[Message]) -> bool {
    messages
        .iter()
        .rev()
        .find(|message| message.role() != Role::System)
        .is_some_and(|message| message.role() == Role::User)
}

#[async_trait]
impl PipelineStage for ToolLlmSelectorStage {
    fn name(&self) -> &str {
        "tool_llm_selector"
    }

    async fn pre_model(&self, request: &mut PipelineRequest) -> StageResult {
        if request.tools.is_empty() || request.tools.len() < self.min_tools {
            return Ok(());
        }
        if !last_turn_is_user(&request.messages) {
            return Ok(());
        }
        let (endpoint, model) = self.breaker_key();
        if self.state.is_disabled(&endpoint, &model) {
            debug!(%endpoint, %model, "tool selector cooling down; skipping");
            return Ok(());
        }
        let user_text = last_user_text(&request.messages);
        if user_text.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = request
            .tools
            .iter()
            .map(|tool| tool.name.trim())
            .filter(|name| !name.is_empty())
            .collect();
        let key = cache_key(&user_text, &names);

        if let Some(cached) = self.state.cache.get(&key) {
            let filtered = self.apply_selection(&request.tools, &cached);
            debug!(cached = cached.len(), after = filtered.len(), "tool selection cache hit");
            if !filtered.is_empty() {
                request.tools = filtered;
            }
            return Ok(());
        }

        let selection = match self.ask(&user_text, &names).await {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                warn!("tool selector reply had no tool list; skipping selection");
                self.trip();
                return Ok(());
            }
            Err(err) => {
                warn!(error = %err, "tool selector failed; skipping selection");
                self.trip();
                return Ok(());
            }
        };

        self.state.cache.insert(key, selection.clone());
        let filtered = self.apply_selection(&request.tools, &selection);
        if filtered.is_empty() {
            warn!("tool selector produced an empty tool list; leaving tools unfiltered");
            self.trip();
            return Ok(());
        }
        debug!(before = request.tools.len(), after = filtered.len(), "tools selected");
        request.tools = filtered;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_object_array_and_noise() {
        assert_eq!(
            parse_selection("Sure! {\"tools\": [\"a\", \" b \", \"a\"]} done"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_selection("[\"x\"]"),
            Some(vec!["x".to_string()])
        );
        assert_eq!(parse_selection("{\"picked\": []}"), None);
        assert_eq!(parse_selection("{\"tools\": \"a\"}"), None);
        assert_eq!(parse_selection("no json here"), None);
        assert_eq!(parse_selection(""), None);
    }

    #[test]
    fn cache_key_normalizes_text_but_not_tool_order() {
        assert_eq!(cache_key("  Weather? ", &["a", "b"]), cache_key("weather?", &["a", "b"]));
        assert_ne!(cache_key("weather?", &["a", "b"]), cache_key("weather?", &["b", "a"]));
        assert_ne!(cache_key("weather?", &["ab"]), cache_key("weather?", &["a", "b"]));
    }

    #[test]
    fn last_turn_ignores_system_messages() {
        assert!(last_turn_is_user(&[Message::user("hi"), Message::system("note")]));
        assert!(!last_turn_is_user(&[Message::user("hi"), Message::assistant("yo")]));
        assert!(!last_turn_is_user(&[Message::system("only")]));
    }
}
