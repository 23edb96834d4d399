//! Streamed chunk wire types and their mapping onto [`StreamEvent`]s.

use serde::Deserialize;

use crate::types::{StreamEvent, ToolCallDelta};

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallChunk>>,
    #[serde(default)]
    function_call: Option<FunctionChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolCallChunk {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionChunk {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Maps chunks to events and remembers the last reported finish reason.
#[derive(Debug, Default)]
pub(super) struct ChunkMapper {
    finish_reason: Option<String>,
}

impl ChunkMapper {
    /// Events for one chunk; a lone empty text delta when nothing maps.
    pub(super) fn map(&mut self, chunk: ChatChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(content) = non_empty(delta.content) {
                    events.push(StreamEvent::text(content));
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let function = call.function.unwrap_or_default();
                    events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                        index: call.index,
                        tool_call_id: non_empty(call.id),
                        name: non_empty(function.name),
                        arguments_delta: non_empty(function.arguments),
                    }));
                }
                if let Some(function) = delta.function_call {
                    events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                        index: 0,
                        tool_call_id: None,
                        name: non_empty(function.name),
                        arguments_delta: non_empty(function.arguments),
                    }));
                }
            }
            if let Some(reason) = non_empty(choice.finish_reason) {
                self.finish_reason = Some(reason);
            }
        }
        if events.is_empty() {
            events.push(StreamEvent::text(""));
        }
        events
    }

    pub(super) fn finish(self) -> StreamEvent {
        StreamEvent::done(self.finish_reason)
    }
}
