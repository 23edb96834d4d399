//! Strand: a bounded, cancellable tool-calling agent loop.
//!
//! A conversation plus a set of callable tools goes in; a single lazy stream
//! of [`types::StreamEvent`]s comes out. Between model turns an ordered
//! [`pipeline::Pipeline`] of stages may rewrite the request, the buffered
//! model output, the tool calls and the tool results.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use strand::prelude::*;
//!
//! # async fn example() -> strand::error::Result<()> {
//! let config = StrandConfig::resolve(None)?;
//! let backend = Arc::new(OpenAiCompatibleBackend::new(config.backend.clone())?);
//!
//! let tools = ToolSet::new().with_tool(
//!     ToolSpec::new("echo", "Echo the input", ParameterBuilder::new().string("text", "Text", true).build()),
//!     |args: ToolArguments| async move { Ok(args.get_str("text")?.to_string()) },
//! )?;
//! let specs = tools.specs();
//!
//! let runner = AgentLoopRunner::new(backend, ToolRunner::new(Arc::new(tools)))
//!     .with_tools(specs)
//!     .with_config(config.agent.clone());
//!
//! let mut events = runner.stream(
//!     vec![Message::user("Say hi via the echo tool")],
//!     CancellationToken::new(),
//!     RuntimeMap::new(),
//! );
//! while let Some(event) = events.next().await {
//!     if let StreamEvent::TextDelta { delta } = event {
//!         print!("{delta}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod provider;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
