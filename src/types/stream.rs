//! Streaming event types and tool-call delta accumulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::ToolCall;

/// Well-known finish reasons attached to the terminal [`StreamEvent::Done`].
pub mod finish_reason {
    pub const STOP: &str = "stop";
    pub const TOOL_CALLS: &str = "tool_calls";
    pub const ERROR: &str = "error";
    pub const TOOL_LOOP_LIMIT: &str = "tool_loop_limit";
    pub const TOOL_CALL_LIMIT: &str = "tool_call_limit";
    pub const PIPELINE_ABORT: &str = "pipeline_abort";
}

/// An event produced by a backend stream or by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta(ToolCallDelta),
    #[serde(rename = "tool.result")]
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception_type: Option<String>,
    },
    #[serde(rename = "done")]
    Done {
        #[serde(default)]
        finish_reason: Option<String>,
    },
}

impl StreamEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn error(message: impl Into<String>, exception_type: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            exception_type: Some(exception_type.into()),
        }
    }

    pub fn done(finish_reason: Option<String>) -> Self {
        Self::Done { finish_reason }
    }

    pub fn done_with(finish_reason: &str) -> Self {
        Self::Done {
            finish_reason: Some(finish_reason.to_string()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// A fragment of one streamed tool call, addressed by its stream index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_delta: Option<String>,
}

/// Merged state of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallState {
    pub index: usize,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub arguments_json: String,
}

impl ToolCallState {
    /// Complete calls have a non-empty id and name. Arguments may be empty.
    pub fn is_complete(&self) -> bool {
        self.tool_call_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.name.as_deref().is_some_and(|name| !name.is_empty())
    }

    /// The finished call, or `None` while id or name is still missing.
    pub fn to_tool_call(&self) -> Option<ToolCall> {
        if !self.is_complete() {
            return None;
        }
        Some(ToolCall {
            id: self.tool_call_id.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            arguments_json: self.arguments_json.clone(),
        })
    }
}

impl From<ToolCall> for ToolCallState {
    fn from(call: ToolCall) -> Self {
        Self {
            index: 0,
            tool_call_id: Some(call.id),
            name: Some(call.name),
            arguments_json: call.arguments_json,
        }
    }
}

/// Reduces interleaved [`ToolCallDelta`]s into per-index [`ToolCallState`]s.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCallState>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let state = self.calls.entry(delta.index).or_insert_with(|| ToolCallState {
            index: delta.index,
            ..ToolCallState::default()
        });
        if let Some(id) = delta.tool_call_id.as_deref().filter(|id| !id.is_empty()) {
            state.tool_call_id = Some(id.to_string());
        }
        if let Some(name) = delta.name.as_deref().filter(|name| !name.is_empty()) {
            state.name = Some(name.to_string());
        }
        if let Some(fragment) = &delta.arguments_delta {
            state.arguments_json.push_str(fragment);
        }
    }

    /// All tracked calls ordered by stream index.
    pub fn list(&self) -> Vec<ToolCallState> {
        self.calls.values().cloned().collect()
    }

    /// Only the complete calls, ordered by stream index.
    pub fn into_complete(self) -> Vec<ToolCallState> {
        self.calls
            .into_values()
            .filter(ToolCallState::is_complete)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            tool_call_id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments_delta: args.map(str::to_string),
        }
    }

    #[test]
    fn merges_fields_arriving_in_separate_chunks() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&delta(0, None, None, Some("{\"ci")));
        acc.apply(&delta(0, Some("call_1"), None, None));
        acc.apply(&delta(0, None, None, Some("ty\":")));
        acc.apply(&delta(0, None, Some("get_weather"), Some("\"Oslo\"}")));

        let calls = acc.list();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].name.as_deref(), Some("get_weather"));
        assert_eq!(calls[0].arguments_json, "{\"city\":\"Oslo\"}");
        assert!(calls[0].is_complete());
    }

    #[test]
    fn interleaved_indices_keep_their_own_fragments() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&delta(1, Some("b"), Some("search"), Some("{\"q\"")));
        acc.apply(&delta(0, Some("a"), Some("calc"), Some("{\"x\"")));
        acc.apply(&delta(1, None, None, Some(":\"rust\"}")));
        acc.apply(&delta(0, None, None, Some(":1}")));

        let calls = acc.list();
        assert_eq!(
            calls.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(calls[0].arguments_json, "{\"x\":1}");
        assert_eq!(calls[1].arguments_json, "{\"q\":\"rust\"}");
    }

    #[test]
    fn every_split_point_reconstructs_arguments() {
        let arguments = "{\"path\":\"/tmp/a b.txt\",\"lines\":[1,2,3]}";
        for split in 0..=arguments.len() {
            let (head, tail) = arguments.split_at(split);
            let mut acc = ToolCallAccumulator::new();
            acc.apply(&delta(0, None, Some("read_file"), Some(head)));
            acc.apply(&delta(0, Some("call_9"), None, Some(tail)));
            assert_eq!(acc.list()[0].arguments_json, arguments);
        }
    }

    #[test]
    fn partial_calls_are_not_complete() {
        let mut acc = ToolCallAccumulator::new();
        acc.apply(&delta(0, None, Some("calc"), Some("{}")));
        acc.apply(&delta(1, Some("c2"), Some("calc"), None));

        assert!(!acc.list()[0].is_complete());
        assert_eq!(acc.list()[0].to_tool_call(), None);
        let complete = acc.into_complete();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].index, 1);
        assert_eq!(complete[0].arguments_json, "");
    }

    #[test]
    fn events_serialize_with_dotted_tags() {
        let event = StreamEvent::done_with(finish_reason::STOP);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "done", "finish_reason": "stop"})
        );
        let event = StreamEvent::text("hi");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "text.delta", "delta": "hi"})
        );
    }
}
