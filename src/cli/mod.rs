//! Command-line front end for one-shot agent runs.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agent_loop::AgentLoopRunner;
use crate::config::StrandConfig;
use crate::error::{Result, StrandError};
use crate::pipeline::stages::{standard_pipeline, ToolSelectorState, TOOL_PROFILE_KEY};
use crate::pipeline::RuntimeMap;
use crate::provider::{ChatBackend, OpenAiCompatibleBackend};
use crate::tools::{ParameterBuilder, ToolArguments, ToolRunner, ToolSet, ToolSpec};
use crate::types::{Message, StreamEvent};
use crate::util::text::take_chars;

const TOOL_PREVIEW_CHARS: usize = 200;

/// Strand agent CLI
#[derive(Parser, Debug)]
#[command(name = "strand", version, about = "Run a tool-calling agent loop")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream one agent run for a prompt
    Chat(ChatArgs),
}

/// Arguments for `strand chat`.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Config file (defaults to the per-user strand.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Permission profile for this run
    #[arg(short, long)]
    pub profile: Option<String>,

    /// User prompt
    pub prompt: String,
}

/// Tools available to every CLI run.
pub fn builtin_tools() -> Result<ToolSet> {
    ToolSet::new().with_tool(
        ToolSpec::new(
            "current_time",
            "Current local date and time",
            ParameterBuilder::new()
                .string("format", "strftime format string; RFC 3339 when omitted", false)
                .build(),
        ),
        |args: ToolArguments| async move { current_time(args.get_str_opt("format")) },
    )
}

fn current_time(format: Option<&str>) -> Result<String> {
    let now = chrono::Local::now();
    match format.map(str::trim).filter(|f| !f.is_empty()) {
        None => Ok(now.to_rfc3339()),
        Some(format) => {
            let mut out = String::new();
            write!(out, "{}", now.format(format)).map_err(|_| {
                StrandError::InvalidArgument(format!("invalid time format: {format}"))
            })?;
            Ok(out)
        }
    }
}

/// Run `strand chat`. Returns an error when the run ended with an error event.
pub async fn run_chat(args: ChatArgs) -> Result<()> {
    let config = StrandConfig::resolve(args.config.as_deref())?;
    let backend: Arc<dyn ChatBackend> = Arc::new(OpenAiCompatibleBackend::new(config.backend.clone())?);
    let selector_backend: Arc<dyn ChatBackend> = match &config.stages.selector.model {
        Some(model) if model != &config.backend.model => {
            let mut selector_config = config.backend.clone();
            selector_config.model = model.clone();
            Arc::new(OpenAiCompatibleBackend::new(selector_config)?)
        }
        _ => backend.clone(),
    };

    let pipeline = standard_pipeline(
        &config.stages,
        Some(selector_backend),
        Arc::new(ToolSelectorState::from_config(&config.stages.selector)),
    )?;
    let tools = builtin_tools()?;
    let specs = tools.specs();
    let runner = AgentLoopRunner::new(
        backend,
        ToolRunner::new(Arc::new(tools)).with_default_timeout(config.agent.tool_timeout()),
    )
    .with_tools(specs)
    .with_config(config.agent.clone())
    .with_pipeline(pipeline);

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(args.prompt));

    let mut runtime = RuntimeMap::new();
    if let Some(profile) = args.profile {
        runtime.insert(TOOL_PROFILE_KEY.to_string(), json!(profile));
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    info!(model = %config.backend.model, "starting chat run");
    let mut events = runner.stream(messages, cancel.clone(), runtime);
    let mut failure = None;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::TextDelta { delta } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::ToolResult {
                tool_call_id,
                content,
            } => {
                let preview = take_chars(&content, TOOL_PREVIEW_CHARS);
                let ellipsis = if preview.len() < content.len() { "..." } else { "" };
                eprintln!("\n⚡ {tool_call_id}: {preview}{ellipsis}");
            }
            StreamEvent::Error {
                message,
                exception_type,
            } => {
                eprintln!("\n❌ {message}");
                failure = Some(StrandError::Stream(format!(
                    "{}: {message}",
                    exception_type.as_deref().unwrap_or("Error")
                )));
            }
            StreamEvent::Done { finish_reason } => {
                println!();
                info!(finish_reason = finish_reason.as_deref().unwrap_or(""), "chat run finished");
            }
            StreamEvent::ToolCallDelta(_) => {}
        }
    }
    if cancel.is_cancelled() {
        eprintln!("cancelled");
    }

    failure.map_or(Ok(()), Err)
}
