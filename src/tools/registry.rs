//! Registration and lookup of tool specs.

use std::collections::HashMap;

use serde_json::Value;

use super::spec::ToolSpec;
use crate::error::{Result, StrandError};

/// Ordered set of [`ToolSpec`]s with unique names.
///
/// Specs cannot be changed once registered.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec. Fails on an empty or duplicate name.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(StrandError::InvalidArgument(
                "tool name must not be empty".into(),
            ));
        }
        if self.by_name.contains_key(&spec.name) {
            return Err(StrandError::InvalidArgument(format!(
                "tool '{}' is already registered",
                spec.name
            )));
        }
        self.by_name.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.by_name.get(name).map(|&index| &self.specs[index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Specs in registration order.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn to_wire(&self) -> Vec<Value> {
        self.specs.iter().map(ToolSpec::to_wire).collect()
    }
}
