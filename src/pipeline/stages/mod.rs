//! Built-in pipeline stages and the standard stack.

pub mod context_trim;
pub mod heuristic;
pub mod permission;
pub mod quota;
pub mod selector;
pub mod truncation;

use std::sync::Arc;

pub use context_trim::ContextToolUsesTrimStage;
pub use heuristic::ToolHeuristicPrefilterStage;
pub use permission::{PermissionScopedToolsStage, TOOL_PROFILE_KEY};
pub use quota::ToolCallLimitStage;
pub use selector::{ToolLlmSelectorStage, ToolSelectorState, DEFAULT_SELECTOR_PROMPT};
pub use truncation::ToolOutputTruncationStage;

use super::Pipeline;
use crate::config::StagesConfig;
use crate::error::Result;
use crate::provider::ChatBackend;
use crate::types::{Content, ContentPart, Message, Role};

/// The standard stage stack, in order: permission, heuristic prefilter, LLM
/// selector, context trim, tool-call quota, output truncation.
///
/// Stages switched off by configuration are left out. The selector also
/// needs a backend.
pub fn standard_pipeline(
    config: &StagesConfig,
    selector_backend: Option<Arc<dyn ChatBackend>>,
    selector_state: Arc<ToolSelectorState>,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();

    if !config.permission.profiles.is_empty() {
        pipeline = pipeline.with_stage(PermissionScopedToolsStage::new(
            config.permission.profiles.clone(),
            config.permission.default_profile.clone(),
        ));
    }
    if config.heuristic.enabled {
        pipeline = pipeline.with_stage(ToolHeuristicPrefilterStage::from_config(&config.heuristic));
    }
    if let Some(backend) = selector_backend.filter(|_| config.selector.enabled) {
        pipeline = pipeline.with_stage(ToolLlmSelectorStage::from_config(
            &config.selector,
            backend,
            selector_state,
        ));
    }
    if config.context_trim.max_tool_context_tokens > 0 {
        pipeline = pipeline.with_stage(ContextToolUsesTrimStage::new(
            config.context_trim.max_tool_context_tokens,
        ));
    }
    if config.quota.per_run_limit > 0 {
        pipeline = pipeline.with_stage(ToolCallLimitStage::new(config.quota.per_run_limit)?);
    }
    if config.truncation.max_output_chars > 0 {
        pipeline = pipeline.with_stage(ToolOutputTruncationStage::new(
            config.truncation.max_output_chars,
        ));
    }

    Ok(pipeline)
}

/// Text of a message, joining non-empty text parts with newlines.
pub(crate) fn plain_text(message: &Message) -> String {
    match message.content() {
        None => String::new(),
        Some(Content::Text(text)) => text.clone(),
        Some(Content::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Trimmed text of the latest user message, or empty.
pub(crate) fn last_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|message| message.role() == Role::User)
        .map(|message| plain_text(message).trim().to_string())
        .unwrap_or_default()
}
