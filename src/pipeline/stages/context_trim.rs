//! Sliding-window trimming of historical tool usage.

use std::ops::Range;

use async_trait::async_trait;
use tracing::debug;

use super::plain_text;
use crate::pipeline::{PipelineRequest, PipelineStage, StageResult};
use crate::types::{Message, Role};
use crate::util::text::{char_len, estimate_tokens, take_chars};

const TRUNCATED_SUFFIX: &str = "\n...[truncated]";

/// A contiguous run of tool traffic: an assistant message carrying tool calls
/// plus the tool results after it, or a run of orphan tool results.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolGroup {
    span: Range<usize>,
    cost: usize,
}

/// Keeps the estimated token cost of tool traffic in the context under a
/// budget.
///
/// Older groups are dropped first. The newest group is never dropped; if it
/// alone is over budget its tool results are shortened instead. Plain user,
/// system and assistant text is never touched.
#[derive(Debug, Clone)]
pub struct ContextToolUsesTrimStage {
    max_tool_context_tokens: usize,
}

impl ContextToolUsesTrimStage {
    /// Zero disables trimming.
    pub fn new(max_tool_context_tokens: usize) -> Self {
        Self {
            max_tool_context_tokens,
        }
    }

    fn trim(&self, messages: &[Message]) -> Option<Vec<Message>> {
        let budget = self.max_tool_context_tokens;
        let groups = collect_tool_groups(messages);
        let total: usize = groups.iter().map(|g| g.cost).sum();
        if groups.is_empty() || total <= budget {
            return None;
        }

        let mut remaining = total;
        let mut dropped: Vec<Range<usize>> = Vec::new();
        for group in &groups[..groups.len() - 1] {
            if remaining <= budget {
                break;
            }
            dropped.push(group.span.clone());
            remaining -= group.cost;
        }

        let mut kept: Vec<Message> = messages
            .iter()
            .enumerate()
            .filter(|(index, _)| !dropped.iter().any(|span| span.contains(index)))
            .map(|(_, message)| message.clone())
            .collect();

        let groups = collect_tool_groups(&kept);
        let total: usize = groups.iter().map(|g| g.cost).sum();
        if let Some((last, older)) = groups.split_last() {
            if total > budget {
                let other_cost: usize = older.iter().map(|g| g.cost).sum();
                shrink_group(&mut kept, last.span.clone(), budget.saturating_sub(other_cost));
            }
        }

        debug!(
            tool_tokens = total,
            budget,
            dropped_groups = dropped.len(),
            "historical tool context trimmed"
        );
        (kept != messages).then_some(kept)
    }
}

#[async_trait]
impl PipelineStage for ContextToolUsesTrimStage {
    fn name(&self) -> &str {
        "context_tool_uses_trim"
    }

    async fn pre_model(&self, request: &mut PipelineRequest) -> StageResult {
        if self.max_tool_context_tokens == 0 {
            return Ok(());
        }
        if let Some(messages) = self.trim(&request.messages) {
            request.messages = messages;
        }
        Ok(())
    }
}

fn tool_noise_tokens(message: &Message) -> usize {
    match message.role() {
        Role::Tool => estimate_tokens(&plain_text(message)),
        Role::Assistant if message.has_tool_calls() => {
            let lines: Vec<String> = message
                .tool_calls()
                .iter()
                .filter(|call| !call.name.is_empty() || !call.arguments_json.is_empty())
                .map(|call| format!("{}:{}", call.name, call.arguments_json))
                .collect();
            estimate_tokens(&lines.join("\n"))
        }
        _ => 0,
    }
}

fn collect_tool_groups(messages: &[Message]) -> Vec<ToolGroup> {
    let mut groups = Vec::new();
    let mut index = 0;
    while index < messages.len() {
        let message = &messages[index];
        let opens_group = match message.role() {
            Role::Assistant => message.has_tool_calls(),
            Role::Tool => true,
            _ => false,
        };
        if !opens_group {
            index += 1;
            continue;
        }
        let start = index;
        let mut end = index + 1;
        while end < messages.len() && messages[end].role() == Role::Tool {
            end += 1;
        }
        let cost = messages[start..end].iter().map(tool_noise_tokens).sum();
        groups.push(ToolGroup {
            span: start..end,
            cost,
        });
        index = end;
    }
    groups
}

/// Spread `allowed_tokens` (minus the assistant call cost) across the tool
/// results in `span`; later results get the remainder.
fn shrink_group(messages: &mut [Message], span: Range<usize>, allowed_tokens: usize) {
    let mut assistant_cost = 0;
    let mut tool_indices = Vec::new();
    for index in span {
        if messages[index].role() == Role::Tool {
            tool_indices.push(index);
        } else {
            assistant_cost += tool_noise_tokens(&messages[index]);
        }
    }
    if tool_indices.is_empty() {
        return;
    }

    let tool_budget = allowed_tokens.saturating_sub(assistant_cost);
    let count = tool_indices.len();
    let base = tool_budget / count;
    let remainder = tool_budget % count;

    for (position, index) in tool_indices.into_iter().enumerate() {
        let extra = usize::from(position >= count - remainder);
        let text = plain_text(&messages[index]);
        let truncated = truncate_to_tokens(&text, base + extra);
        if truncated != text {
            messages[index] = messages[index].clone().with_text(truncated);
        }
    }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return String::new();
    }
    let max_chars = max_tokens * 4;
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let suffix_len = char_len(TRUNCATED_SUFFIX);
    if max_chars <= suffix_len {
        return take_chars(TRUNCATED_SUFFIX, max_chars).to_string();
    }
    format!("{}{TRUNCATED_SUFFIX}", take_chars(text, max_chars - suffix_len))
}
