//! Tool specs, registration, and execution.

pub mod arguments;
pub mod executor;
pub mod registry;
pub mod runner;
pub mod spec;
pub mod trace;

pub use arguments::ToolArguments;
pub use executor::{ToolExecutor, ToolSet};
pub use registry::ToolRegistry;
pub use runner::{ToolRunner, DEFAULT_TOOL_TIMEOUT};
pub use spec::{ParameterBuilder, ToolSpec};
pub use trace::{InMemoryTraceRecorder, ToolTrace, ToolTraceRecorder};
