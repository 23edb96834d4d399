//! Per-run ceiling on executed tool calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, StrandError};
use crate::pipeline::{PipelineAbort, PipelineStage, StageResult};
use crate::types::ToolCallState;

/// `exception_type` of the Error event ending a run over its tool-call quota.
pub const TOOL_CALL_LIMIT_KIND: &str = "ToolCallLimitError";

/// Aborts the run before any batch that would push the total past the limit.
///
/// The configured instance only holds the limit; every run counts against its
/// own [`PipelineStage::for_run`] copy, so concurrent runs never share a total.
#[derive(Debug)]
pub struct ToolCallLimitStage {
    per_run_limit: usize,
    used: AtomicUsize,
}

impl ToolCallLimitStage {
    pub fn new(per_run_limit: usize) -> Result<Self> {
        if per_run_limit == 0 {
            return Err(StrandError::InvalidArgument(
                "per_run_limit must be greater than zero".into(),
            ));
        }
        Ok(Self {
            per_run_limit,
            used: AtomicUsize::new(0),
        })
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    fn abort(message: String) -> PipelineAbort {
        PipelineAbort::new(message)
            .with_kind(TOOL_CALL_LIMIT_KIND)
            .with_finish_reason(crate::types::finish_reason::TOOL_CALL_LIMIT)
    }
}

#[async_trait]
impl PipelineStage for ToolCallLimitStage {
    fn name(&self) -> &str {
        "tool_call_limit"
    }

    fn for_run(&self) -> Option<Arc<dyn PipelineStage>> {
        Some(Arc::new(Self {
            per_run_limit: self.per_run_limit,
            used: AtomicUsize::new(0),
        }))
    }

    async fn pre_tool_calls(&self, calls: &mut Vec<ToolCallState>) -> StageResult {
        let used = self.used();
        let remaining = self.per_run_limit.saturating_sub(used);
        if remaining == 0 {
            return Err(Self::abort("tool call limit exceeded".into()).into());
        }
        if calls.len() > remaining {
            return Err(Self::abort(format!(
                "tool call limit exceeded (limit={}, used={used})",
                self.per_run_limit
            ))
            .into());
        }
        self.used.fetch_add(calls.len(), Ordering::SeqCst);
        debug!(used = used + calls.len(), limit = self.per_run_limit, "tool calls admitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageError;
    use crate::types::finish_reason;

    fn calls(n: usize) -> Vec<ToolCallState> {
        (0..n)
            .map(|index| ToolCallState {
                index,
                tool_call_id: Some(format!("call_{index}")),
                name: Some("calc".into()),
                arguments_json: "{}".into(),
            })
            .collect()
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert!(matches!(
            ToolCallLimitStage::new(0),
            Err(StrandError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn batch_over_remaining_aborts() {
        let stage = ToolCallLimitStage::new(3).unwrap();
        stage.pre_tool_calls(&mut calls(2)).await.unwrap();

        let err = stage.pre_tool_calls(&mut calls(2)).await.unwrap_err();
        let StageError::Abort(abort) = err else {
            panic!("expected abort");
        };
        assert_eq!(abort.kind, TOOL_CALL_LIMIT_KIND);
        assert_eq!(abort.finish_reason, finish_reason::TOOL_CALL_LIMIT);
        assert_eq!(abort.message, "tool call limit exceeded (limit=3, used=2)");

        stage.pre_tool_calls(&mut calls(1)).await.unwrap();
        let err = stage.pre_tool_calls(&mut calls(1)).await.unwrap_err();
        assert!(matches!(err, StageError::Abort(ref a) if a.message == "tool call limit exceeded"));
    }

    #[tokio::test]
    async fn each_run_counts_separately() {
        let stage = ToolCallLimitStage::new(1).unwrap();
        let first = stage.for_run().unwrap();
        let second = stage.for_run().unwrap();

        first.pre_tool_calls(&mut calls(1)).await.unwrap();
        second.pre_tool_calls(&mut calls(1)).await.unwrap();
        assert!(matches!(
            first.pre_tool_calls(&mut calls(1)).await,
            Err(StageError::Abort(_))
        ));
        assert_eq!(stage.used(), 0);
    }
}
