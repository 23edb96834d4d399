//! Ordered middleware stages around each model turn.
//!
//! A [`Pipeline`] runs every stage's hook in registration order. Each hook
//! returns a [`StageResult`]:
//! - `Ok(())` keeps the (possibly mutated) payload;
//! - `Err(StageError::Failed(_))`, or a panic, restores the payload as it was
//!   before that stage and moves on to the next stage;
//! - `Err(StageError::Abort(_))` stops the pipeline and is handed back to the
//!   caller untouched.

pub mod stages;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StrandError;
use crate::tools::runner::panic_message;
use crate::tools::ToolSpec;
use crate::types::{finish_reason, Message, StreamEvent, ToolCallState};

/// Opaque per-turn values read by stages, e.g. the active permission profile.
pub type RuntimeMap = HashMap<String, Value>;

/// Request side of one model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub runtime: RuntimeMap,
}

/// Buffered output of one model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineResponse {
    /// Buffered text deltas, not yet emitted.
    pub events: Vec<StreamEvent>,
    pub tool_calls: Vec<ToolCallState>,
    pub finish_reason: Option<String>,
}

/// Intentional early termination of a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PipelineAbort {
    pub message: String,
    /// Machine-readable kind, surfaced as the error event's `exception_type`.
    pub kind: String,
    pub finish_reason: String,
}

impl PipelineAbort {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: "PipelineAbort".to_string(),
            finish_reason: finish_reason::PIPELINE_ABORT.to_string(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: impl Into<String>) -> Self {
        self.finish_reason = finish_reason.into();
        self
    }

    /// The terminal `Error` + `Done` pair for this abort.
    pub fn into_events(self) -> [StreamEvent; 2] {
        [
            StreamEvent::error(self.message, self.kind),
            StreamEvent::done(Some(self.finish_reason)),
        ]
    }
}

/// Outcome of a failing stage hook.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("pipeline aborted: {0}")]
    Abort(#[from] PipelineAbort),
    #[error(transparent)]
    Failed(#[from] StrandError),
}

pub type StageResult = Result<(), StageError>;

/// A unit of request/response policy. Every hook defaults to a no-op.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &str;

    /// A fresh instance for one agent-loop run, for stages that keep
    /// per-run state. `None` shares this instance across runs.
    fn for_run(&self) -> Option<Arc<dyn PipelineStage>> {
        None
    }

    async fn pre_model(&self, _request: &mut PipelineRequest) -> StageResult {
        Ok(())
    }

    async fn post_model(&self, _response: &mut PipelineResponse) -> StageResult {
        Ok(())
    }

    async fn pre_tool_calls(&self, _calls: &mut Vec<ToolCallState>) -> StageResult {
        Ok(())
    }

    async fn post_tool_messages(&self, _messages: &mut Vec<Message>) -> StageResult {
        Ok(())
    }

    /// Rewrite one streamed text delta in place.
    fn stream_filter(&self, _delta: &mut String) -> StageResult {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum Hook {
    PreModel,
    PostModel,
    PreToolCalls,
    PostToolMessages,
    StreamFilter,
}

/// Ordered list of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl PipelineStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// The pipeline one run uses: stateless stages are shared, stateful
    /// ones are replaced by their [`PipelineStage::for_run`] instance.
    pub fn for_run(&self) -> Pipeline {
        Pipeline {
            stages: self
                .stages
                .iter()
                .map(|stage| stage.for_run().unwrap_or_else(|| Arc::clone(stage)))
                .collect(),
        }
    }

    pub async fn pre_model(&self, request: PipelineRequest) -> Result<PipelineRequest, PipelineAbort> {
        self.run_hook(Hook::PreModel, request, |stage, request| stage.pre_model(request))
            .await
    }

    pub async fn post_model(&self, response: PipelineResponse) -> Result<PipelineResponse, PipelineAbort> {
        self.run_hook(Hook::PostModel, response, |stage, response| {
            stage.post_model(response)
        })
        .await
    }

    pub async fn pre_tool_calls(
        &self,
        calls: Vec<ToolCallState>,
    ) -> Result<Vec<ToolCallState>, PipelineAbort> {
        self.run_hook(Hook::PreToolCalls, calls, |stage, calls| {
            stage.pre_tool_calls(calls)
        })
        .await
    }

    pub async fn post_tool_messages(&self, messages: Vec<Message>) -> Result<Vec<Message>, PipelineAbort> {
        self.run_hook(Hook::PostToolMessages, messages, |stage, messages| {
            stage.post_tool_messages(messages)
        })
        .await
    }

    pub fn stream_filter(&self, delta: String) -> Result<String, PipelineAbort> {
        let mut delta = delta;
        for stage in &self.stages {
            let before = delta.clone();
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| stage.stream_filter(&mut delta)));
            if settle(Hook::StreamFilter, stage.name(), outcome)? {
                delta = before;
            }
        }
        Ok(delta)
    }

    async fn run_hook<T, F>(&self, hook: Hook, mut payload: T, call: F) -> Result<T, PipelineAbort>
    where
        T: Clone + Send,
        F: for<'a> Fn(&'a dyn PipelineStage, &'a mut T) -> BoxFuture<'a, StageResult>,
    {
        for stage in &self.stages {
            let before = payload.clone();
            let outcome = AssertUnwindSafe(call(stage.as_ref(), &mut payload))
                .catch_unwind()
                .await;
            if settle(hook, stage.name(), outcome)? {
                payload = before;
            }
        }
        Ok(payload)
    }
}

/// Classify a hook outcome. `Ok(true)` means the stage failed and the
/// pre-hook payload must be restored.
fn settle(
    hook: Hook,
    stage: &str,
    outcome: std::thread::Result<StageResult>,
) -> Result<bool, PipelineAbort> {
    match outcome {
        Ok(Ok(())) => Ok(false),
        Ok(Err(StageError::Abort(abort))) => {
            debug!(%hook, stage, kind = %abort.kind, "stage aborted the run");
            Err(abort)
        }
        Ok(Err(StageError::Failed(err))) => {
            warn!(%hook, stage, error = %err, "pipeline stage failed; skipping");
            Ok(true)
        }
        Err(panic) => {
            warn!(
                %hook,
                stage,
                error = %panic_message(panic.as_ref()),
                "pipeline stage panicked; skipping"
            );
            Ok(true)
        }
    }
}
