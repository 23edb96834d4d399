//! Shared test helpers: a scripted chat backend and a recording executor.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use strand::error::StrandError;
use strand::provider::{ChatBackend, ChatRequest, ChatResponse, EventStream};
use strand::tools::{ParameterBuilder, ToolArguments, ToolExecutor, ToolSpec};
use strand::types::{StreamEvent, ToolCallDelta};

/// What one `stream()` call produces.
pub enum Script {
    Events(Vec<Result<StreamEvent, StrandError>>),
    /// `stream()` itself fails.
    Fail(StrandError),
    /// Emits the events, then never finishes.
    Hang(Vec<StreamEvent>),
}

/// A backend that replays queued scripts and records every request.
pub struct ScriptedBackend {
    model: String,
    streams: Mutex<VecDeque<Script>>,
    completions: Mutex<VecDeque<Result<ChatResponse, StrandError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::with_model("scripted-model")
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            streams: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self, script: Script) -> &Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn queue_events(&self, events: Vec<StreamEvent>) -> &Self {
        self.queue(Script::Events(events.into_iter().map(Ok).collect()))
    }

    pub fn queue_completion(&self, result: Result<ChatResponse, StrandError>) -> &Self {
        self.completions.lock().unwrap().push_back(result);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn endpoint(&self) -> &str {
        "scripted://backend"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, StrandError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChatResponse::default()))
    }

    async fn stream(&self, request: &ChatRequest) -> Result<EventStream, StrandError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Events(vec![Ok(StreamEvent::done_with("stop"))]));
        match script {
            Script::Events(events) => Ok(stream::iter(events).boxed()),
            Script::Fail(err) => Err(err),
            Script::Hang(events) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}

/// Text split into a few deltas, then `Done("stop")`.
pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
    let (head, tail) = text.split_at(mid);
    vec![
        StreamEvent::text(head),
        StreamEvent::text(""),
        StreamEvent::text(tail),
        StreamEvent::done_with("stop"),
    ]
}

/// Tool calls streamed the way real gateways do: id and name first, the
/// arguments split across later deltas. Ends with `Done("tool_calls")`.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    for (index, (id, name, args)) in calls.iter().enumerate() {
        events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
            index,
            tool_call_id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments_delta: None,
        }));
        let mid = args.len() / 2;
        for part in [&args[..mid], &args[mid..]] {
            events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                index,
                tool_call_id: None,
                name: None,
                arguments_delta: Some(part.to_string()),
            }));
        }
    }
    events.push(StreamEvent::done_with("tool_calls"));
    events
}

pub fn spec(name: &str) -> ToolSpec {
    ToolSpec::new(name, format!("{name} tool"), ParameterBuilder::empty())
}

pub fn specs(names: &[&str]) -> Vec<ToolSpec> {
    names.iter().map(|name| spec(name)).collect()
}

pub fn tool_names(tools: &[ToolSpec]) -> Vec<String> {
    tools.iter().map(|tool| tool.name.clone()).collect()
}

/// One recorded executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCall {
    pub name: String,
    pub args: Value,
    pub timeout: Duration,
}

/// Executor returning canned outputs per tool name and recording calls.
///
/// Unknown tools answer `"<name> ok"`. An output of `"!panic"` panics and
/// `"!fail"` returns an error.
#[derive(Default)]
pub struct RecordingExecutor {
    outputs: HashMap<String, String>,
    calls: Mutex<Vec<ExecutedCall>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, name: &str, output: &str) -> Self {
        self.outputs.insert(name.to_string(), output.to_string());
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<ExecutedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute_tool(
        &self,
        name: &str,
        timeout: Duration,
        args: ToolArguments,
    ) -> Result<String, StrandError> {
        self.calls.lock().unwrap().push(ExecutedCall {
            name: name.to_string(),
            args: args.clone().into_value(),
            timeout,
        });
        match self.outputs.get(name).map(String::as_str) {
            Some("!panic") => panic!("{name} exploded"),
            Some("!fail") => Err(StrandError::tool(name, "backend unavailable")),
            Some(output) => Ok(output.to_string()),
            None => Ok(format!("{name} ok")),
        }
    }
}
