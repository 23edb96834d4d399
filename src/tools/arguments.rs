//! Typed access to parsed tool call arguments.

use serde_json::{Map, Value};

use crate::error::{Result, StrandError};

/// Parsed tool arguments; always a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    values: Map<String, Value>,
}

impl ToolArguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Parse the raw `arguments_json` of a tool call.
    ///
    /// Blank input and `null` yield an empty object; any other non-object
    /// JSON is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        match serde_json::from_str::<Value>(trimmed)? {
            Value::Null => Ok(Self::default()),
            Value::Object(values) => Ok(Self { values }),
            other => Err(StrandError::InvalidArgument(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StrandError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| StrandError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.values
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| StrandError::InvalidArgument(format!("Missing number argument: {key}")))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.values
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| StrandError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    /// Deserialize the whole argument object into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            StrandError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
