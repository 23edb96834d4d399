//! The tool execution seam and a closure-backed implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::arguments::ToolArguments;
use super::registry::ToolRegistry;
use super::spec::ToolSpec;
use crate::error::{Result, StrandError};

/// Executes a named tool and returns its textual output.
///
/// Errors and panics are contained by the [`ToolRunner`](super::ToolRunner);
/// they become tool-result text rather than failing the run.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute_tool(&self, name: &str, timeout: Duration, args: ToolArguments) -> Result<String>;
}

type ToolHandler = dyn Fn(ToolArguments) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// Specs paired with async handlers.
#[derive(Default, Clone)]
pub struct ToolSet {
    registry: ToolRegistry,
    handlers: HashMap<String, Arc<ToolHandler>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails when the name is already taken.
    pub fn register<F, Fut>(&mut self, spec: ToolSpec, handler: F) -> Result<()>
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let name = spec.name.clone();
        self.registry.register(spec)?;
        self.handlers
            .insert(name, Arc::new(move |args| Box::pin(handler(args))));
        Ok(())
    }

    pub fn with_tool<F, Fut>(mut self, spec: ToolSpec, handler: F) -> Result<Self>
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.register(spec, handler)?;
        Ok(self)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs().to_vec()
    }
}

#[async_trait]
impl ToolExecutor for ToolSet {
    async fn execute_tool(&self, name: &str, _timeout: Duration, args: ToolArguments) -> Result<String> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| StrandError::tool(name, "unknown tool"))?;
        handler(args).await
    }
}
