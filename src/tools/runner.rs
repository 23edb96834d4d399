//! Sequential execution of accumulated tool calls.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::arguments::ToolArguments;
use super::executor::ToolExecutor;
use super::trace::{ToolTrace, ToolTraceRecorder};
use crate::error::{Result, StrandError};
use crate::types::{Message, ToolCallState};
use crate::util::timeout::with_timeout;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs tool calls one after another against an injected [`ToolExecutor`].
#[derive(Clone)]
pub struct ToolRunner {
    executor: Arc<dyn ToolExecutor>,
    default_timeout: Duration,
    recorder: Option<Arc<dyn ToolTraceRecorder>>,
}

impl ToolRunner {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            recorder: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ToolTraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Execute `calls` in order and return one tool message per executed call.
    ///
    /// Stops early, without error, once `cancel` fires. Argument and executor
    /// failures become tool-result text. An incomplete call is an error.
    pub async fn run(
        &self,
        calls: &[ToolCallState],
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut messages = Vec::with_capacity(calls.len());

        for call in calls {
            if cancel.is_cancelled() {
                debug!(executed = messages.len(), "tool execution cancelled");
                break;
            }
            let Some(tool_call) = call.to_tool_call() else {
                return Err(StrandError::InvalidState(format!(
                    "incomplete tool call at index {} (id={:?}, name={:?})",
                    call.index, call.tool_call_id, call.name
                )));
            };

            if let Some(recorder) = &self.recorder {
                recorder.mark_start();
            }
            let started_at = Utc::now();
            let clock = Instant::now();

            let (args, outcome) = match ToolArguments::parse(&tool_call.arguments_json) {
                Ok(args) => {
                    let outcome = self.execute(&tool_call.name, timeout, args.clone()).await;
                    (args.into_value(), outcome)
                }
                Err(err) => {
                    warn!(tool = %tool_call.name, error = %err, "tool arguments did not parse");
                    (
                        serde_json::Value::Object(Default::default()),
                        Err(format!("tool argument parsing failed: {err}")),
                    )
                }
            };

            let content = match &outcome {
                Ok(output) => output.clone(),
                Err(error) => error.clone(),
            };

            if let Some(recorder) = &self.recorder {
                let (output, error) = match outcome {
                    Ok(output) => (output, None),
                    Err(error) => (String::new(), Some(error)),
                };
                recorder.record_end(ToolTrace {
                    name: tool_call.name.clone(),
                    args,
                    started_at,
                    duration: clock.elapsed(),
                    output,
                    error,
                });
            }

            messages.push(Message::tool(tool_call.id, content)?.with_name(tool_call.name));
        }

        Ok(messages)
    }

    async fn execute(&self, name: &str, timeout: Duration, args: ToolArguments) -> std::result::Result<String, String> {
        let call = AssertUnwindSafe(self.executor.execute_tool(name, timeout, args)).catch_unwind();
        let result = with_timeout(timeout, async move {
            call.await
                .unwrap_or_else(|panic| Err(StrandError::tool(name, panic_message(panic.as_ref()))))
        })
        .await;

        result.map_err(|err| {
            warn!(tool = %name, error = %err, "tool execution failed");
            format!("tool execution failed: {err}")
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
