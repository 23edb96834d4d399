//! Convenience re-exports for common use.

pub use crate::agent_loop::{AgentLoopRunner, LoopState};
pub use crate::config::{AgentConfig, BackendConfig, StagesConfig, StrandConfig};
pub use crate::error::{Result, StrandError};
pub use crate::pipeline::stages::{standard_pipeline, ToolSelectorState};
pub use crate::pipeline::{
    Pipeline, PipelineAbort, PipelineRequest, PipelineResponse, PipelineStage, RuntimeMap,
    StageError, StageResult,
};
pub use crate::provider::{ChatBackend, ChatRequest, ChatResponse};
#[cfg(feature = "openai")]
pub use crate::provider::OpenAiCompatibleBackend;
pub use crate::tools::{
    ParameterBuilder, ToolArguments, ToolExecutor, ToolRunner, ToolSet, ToolSpec,
};
pub use crate::types::{Content, ContentPart, Message, Role, StreamEvent, ToolCall};
pub use tokio_util::sync::CancellationToken;
