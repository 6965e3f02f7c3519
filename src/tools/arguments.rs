//! Typed access to tool call arguments.

use serde::de::DeserializeOwned;

use crate::error::StrandError;

/// Arguments supplied by the model for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    raw: serde_json::Value,
}

impl ToolArguments {
    pub fn new(raw: serde_json::Value) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.raw
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.raw.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, StrandError> {
        self.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing(key, "string"))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, StrandError> {
        self.get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| missing(key, "integer"))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, StrandError> {
        self.get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| missing(key, "number"))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, StrandError> {
        self.get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| missing(key, "boolean"))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize the whole argument object into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, StrandError> {
        serde_json::from_value(self.raw.clone())
            .map_err(|e| StrandError::InvalidArgument(format!("arguments: {e}")))
    }
}

fn missing(key: &str, expected: &str) -> StrandError {
    StrandError::InvalidArgument(format!("missing or non-{expected} argument '{key}'"))
}
