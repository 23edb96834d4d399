//! Agent loop runner.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{LoopState, RunId};
use crate::config::AgentConfig;
use crate::error::StrandError;
use crate::pipeline::{Pipeline, PipelineAbort, PipelineRequest, PipelineResponse, RuntimeMap};
use crate::provider::{ChatBackend, ChatRequest};
use crate::tools::{ToolRunner, ToolSpec};
use crate::types::{
    finish_reason, Message, StreamEvent, ToolCall, ToolCallAccumulator, ToolCallState,
};

/// `exception_type` of the Error event ending a run that hit `max_tool_rounds`.
pub const TOOL_LOOP_LIMIT_KIND: &str = "ToolLoopLimitError";

/// Drives model turns and tool executions until the model answers without
/// tool calls, a stage aborts, something fails, or the round limit is hit.
///
/// Every run ends with exactly one [`StreamEvent::Done`], preceded by a
/// [`StreamEvent::Error`] on any failure path. A cancelled run ends silently.
#[derive(Clone)]
pub struct AgentLoopRunner {
    backend: Arc<dyn ChatBackend>,
    tools: Vec<ToolSpec>,
    tool_runner: ToolRunner,
    config: AgentConfig,
    pipeline: Option<Arc<Pipeline>>,
}

impl AgentLoopRunner {
    pub fn new(backend: Arc<dyn ChatBackend>, tool_runner: ToolRunner) -> Self {
        Self {
            backend,
            tools: Vec::new(),
            tool_runner,
            config: AgentConfig::default(),
            pipeline: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<Arc<Pipeline>>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start a run over `messages`. Nothing happens until the stream is polled.
    ///
    /// `runtime` is handed to every stage unchanged; the loop never reads it.
    pub fn stream(
        &self,
        messages: Vec<Message>,
        cancel: CancellationToken,
        runtime: RuntimeMap,
    ) -> BoxStream<'static, StreamEvent> {
        let mut runner = self.clone();
        runner.pipeline = self
            .pipeline
            .as_ref()
            .map(|pipeline| Arc::new(pipeline.for_run()));
        let mut run = LoopRun {
            run_id: Uuid::new_v4(),
            runner,
            conversation: messages,
            runtime,
            cancel,
            state: LoopState::AwaitingModelTurn,
        };
        let max_rounds = self.config.max_tool_rounds;

        async_stream::stream! {
            debug!(
                run_id = %run.run_id,
                model = run.runner.backend.model_id(),
                tools = run.runner.tools.len(),
                max_rounds,
                "agent loop started"
            );
            for round in 0..=max_rounds {
                match run.round(round).await {
                    RoundOutcome::Continue(events) => {
                        for event in events {
                            yield event;
                        }
                    }
                    RoundOutcome::Finished(events) => {
                        for event in events {
                            yield event;
                        }
                        return;
                    }
                    RoundOutcome::Cancelled => return,
                }
            }
        }
        .boxed()
    }
}

enum RoundOutcome {
    /// Tools ran; emit these and start the next round.
    Continue(Vec<StreamEvent>),
    /// Terminal events of the run.
    Finished(Vec<StreamEvent>),
    Cancelled,
}

struct LoopRun {
    run_id: RunId,
    runner: AgentLoopRunner,
    conversation: Vec<Message>,
    runtime: RuntimeMap,
    cancel: CancellationToken,
    state: LoopState,
}

impl LoopRun {
    async fn round(&mut self, round: usize) -> RoundOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled(round);
        }
        self.transition(LoopState::AwaitingModelTurn, round);
        let pipeline = self.runner.pipeline.clone();

        let mut request = PipelineRequest {
            messages: self.conversation.clone(),
            tools: self.runner.tools.clone(),
            runtime: self.runtime.clone(),
        };
        if let Some(pipeline) = &pipeline {
            request = match pipeline.pre_model(request).await {
                Ok(request) => request,
                Err(abort) => return self.abort(round, abort),
            };
        }
        if self.cancel.is_cancelled() {
            return self.cancelled(round);
        }

        let chat = ChatRequest {
            messages: request.messages,
            tools: request.tools,
            temperature: self.runner.config.temperature,
            max_tokens: self.runner.config.max_tokens,
            ..ChatRequest::default()
        };
        let mut stream = match self.runner.backend.stream(&chat).await {
            Ok(stream) => stream,
            Err(err) => return self.fail(round, err),
        };

        let cancel = self.cancel.clone();
        let mut accumulator = ToolCallAccumulator::new();
        let mut buffered = Vec::new();
        let mut finish = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = stream.next() => Some(next),
            };
            let Some(next) = next else {
                return self.cancelled(round);
            };
            let Some(item) = next else {
                break;
            };
            match item {
                Ok(StreamEvent::TextDelta { delta }) => {
                    let delta = match &pipeline {
                        Some(pipeline) => match pipeline.stream_filter(delta) {
                            Ok(delta) => delta,
                            Err(abort) => return self.abort(round, abort),
                        },
                        None => delta,
                    };
                    if !delta.is_empty() {
                        buffered.push(StreamEvent::text(delta));
                    }
                }
                Ok(StreamEvent::ToolCallDelta(delta)) => accumulator.apply(&delta),
                Ok(StreamEvent::Done { finish_reason }) => {
                    finish = finish_reason;
                    break;
                }
                Ok(event @ StreamEvent::Error { .. }) => {
                    warn!(run_id = %self.run_id, round, ?event, "backend reported an error");
                    return self.finish(
                        round,
                        LoopState::Error,
                        vec![event, StreamEvent::done_with(finish_reason::ERROR)],
                    );
                }
                Ok(StreamEvent::ToolResult { .. }) => {}
                Err(err) => return self.fail(round, err),
            }
        }

        let mut response = PipelineResponse {
            events: buffered,
            tool_calls: accumulator.into_complete(),
            finish_reason: finish,
        };
        if let Some(pipeline) = &pipeline {
            response = match pipeline.post_model(response).await {
                Ok(response) => response,
                Err(abort) => return self.abort(round, abort),
            };
            response
                .events
                .retain(|event| matches!(event, StreamEvent::TextDelta { delta } if !delta.is_empty()));
        }

        if response.tool_calls.is_empty() {
            return self.complete(round, response);
        }

        let mut calls = response.tool_calls;
        if let Some(pipeline) = &pipeline {
            calls = match pipeline.pre_tool_calls(calls).await {
                Ok(calls) => calls,
                Err(abort) => return self.abort(round, abort),
            };
        }
        if calls.is_empty() {
            return self.complete(
                round,
                PipelineResponse {
                    events: response.events,
                    tool_calls: calls,
                    finish_reason: response.finish_reason,
                },
            );
        }
        if round >= self.runner.config.max_tool_rounds {
            warn!(run_id = %self.run_id, round, "tool loop hit max_tool_rounds");
            return self.finish(
                round,
                LoopState::Error,
                vec![
                    StreamEvent::error("tool loop exceeded max_tool_rounds", TOOL_LOOP_LIMIT_KIND),
                    StreamEvent::done_with(finish_reason::TOOL_LOOP_LIMIT),
                ],
            );
        }

        let Some(tool_calls) = calls
            .iter()
            .map(ToolCallState::to_tool_call)
            .collect::<Option<Vec<ToolCall>>>()
        else {
            return self.fail(
                round,
                StrandError::InvalidState("incomplete tool call reached the tool runner".into()),
            );
        };

        self.transition(LoopState::ExecutingTools, round);
        debug!(
            run_id = %self.run_id,
            round,
            tools = ?tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
            "executing tool calls"
        );
        self.conversation.push(Message::assistant_tool_calls(tool_calls));

        let mut messages = match self
            .runner
            .tool_runner
            .run(&calls, &cancel, Some(self.runner.config.tool_timeout()))
            .await
        {
            Ok(messages) => messages,
            Err(err) => return self.fail(round, err),
        };
        if let Some(pipeline) = &pipeline {
            messages = match pipeline.post_tool_messages(messages).await {
                Ok(messages) => messages,
                Err(abort) => return self.abort(round, abort),
            };
        }

        let mut events = Vec::with_capacity(messages.len());
        for message in messages {
            events.push(StreamEvent::ToolResult {
                tool_call_id: message.tool_call_id().unwrap_or_default().to_string(),
                content: message.text(),
            });
            self.conversation.push(message);
        }
        RoundOutcome::Continue(events)
    }

    /// Emit buffered text and the model's finish reason.
    fn complete(&mut self, round: usize, response: PipelineResponse) -> RoundOutcome {
        let mut events = response.events;
        events.push(StreamEvent::done(response.finish_reason));
        self.finish(round, LoopState::Done, events)
    }

    fn abort(&mut self, round: usize, abort: PipelineAbort) -> RoundOutcome {
        debug!(run_id = %self.run_id, round, kind = %abort.kind, "pipeline aborted the run");
        self.finish(round, LoopState::Aborted, abort.into_events().into())
    }

    fn fail(&mut self, round: usize, err: StrandError) -> RoundOutcome {
        warn!(run_id = %self.run_id, round, error = %err, "agent loop failed");
        self.finish(
            round,
            LoopState::Error,
            vec![
                StreamEvent::error(err.to_string(), err.kind()),
                StreamEvent::done_with(finish_reason::ERROR),
            ],
        )
    }

    fn cancelled(&mut self, round: usize) -> RoundOutcome {
        debug!(run_id = %self.run_id, round, "agent loop cancelled");
        self.transition(LoopState::Done, round);
        RoundOutcome::Cancelled
    }

    fn finish(&mut self, round: usize, state: LoopState, events: Vec<StreamEvent>) -> RoundOutcome {
        self.transition(state, round);
        RoundOutcome::Finished(events)
    }

    fn transition(&mut self, next: LoopState, round: usize) {
        if self.state != next {
            debug!(run_id = %self.run_id, round, from = %self.state, to = %next, "loop state");
            self.state = next;
        }
    }
}
