//! Caps the size of individual tool results.

use async_trait::async_trait;
use tracing::debug;

use super::plain_text;
use crate::pipeline::{PipelineStage, StageResult};
use crate::types::{Message, Role};
use crate::util::text::{char_len, take_chars};

/// Truncates tool-result messages longer than `max_output_chars` characters
/// and appends a marker with the original length. Other roles pass through.
#[derive(Debug, Clone)]
pub struct ToolOutputTruncationStage {
    max_output_chars: usize,
}

impl ToolOutputTruncationStage {
    /// Zero disables truncation.
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }

    fn truncate(&self, text: &str) -> Option<String> {
        let max = self.max_output_chars;
        let len = char_len(text);
        if len <= max {
            return None;
        }
        let suffix = format!(
            "\n\n[...tool output truncated: original length was {len} chars, limit {max} chars]"
        );
        let keep = max.saturating_sub(char_len(&suffix));
        let truncated = if keep == 0 {
            suffix.trim().to_string()
        } else {
            format!("{}{suffix}", take_chars(text, keep))
        };
        (truncated != text).then_some(truncated)
    }
}

#[async_trait]
impl PipelineStage for ToolOutputTruncationStage {
    fn name(&self) -> &str {
        "tool_output_truncation"
    }

    async fn post_tool_messages(&self, messages: &mut Vec<Message>) -> StageResult {
        if self.max_output_chars == 0 {
            return Ok(());
        }
        for message in messages.iter_mut() {
            if message.role() != Role::Tool || message.tool_call_id().map_or(true, str::is_empty) {
                continue;
            }
            if let Some(truncated) = self.truncate(&plain_text(message)) {
                debug!(
                    tool_call_id = message.tool_call_id().unwrap_or_default(),
                    limit = self.max_output_chars,
                    "tool output truncated"
                );
                *message = message.clone().with_text(truncated);
            }
        }
        Ok(())
    }
}
