//! Typed access to invocation arguments.
//!
//! Scripts send arguments as a structured-data array. Accessors return
//! [`PluginError::Arguments`] on a missing index or a type mismatch, which the
//! dispatcher reports to the script side as `MalformedArguments`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

use crate::error::{BridgeError, BridgeResult, PluginError};

/// Positional arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginArgs {
    values: Vec<Value>,
}

impl PluginArgs {
    /// Parse the raw wire payload. Anything but an array is rejected.
    pub fn parse(raw: &str) -> BridgeResult<Self> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Array(values) => Ok(Self { values }),
            other => Err(BridgeError::InvalidArguments(format!(
                "expected an argument array, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    /// The arguments re-assembled as an array value.
    pub fn to_value(&self) -> Value {
        Value::Array(self.values.clone())
    }

    /// True for a missing index or an explicit `null`.
    pub fn is_null(&self, index: usize) -> bool {
        self.get(index).map_or(true, Value::is_null)
    }

    fn require(&self, index: usize) -> Result<&Value, PluginError> {
        self.get(index)
            .ok_or_else(|| PluginError::Arguments(format!("missing argument {index}")))
    }

    pub fn get_str(&self, index: usize) -> Result<&str, PluginError> {
        let value = self.require(index)?;
        value.as_str().ok_or_else(|| mismatch(index, "string", value))
    }

    pub fn get_i64(&self, index: usize) -> Result<i64, PluginError> {
        let value = self.require(index)?;
        value.as_i64().ok_or_else(|| mismatch(index, "integer", value))
    }

    pub fn get_f64(&self, index: usize) -> Result<f64, PluginError> {
        let value = self.require(index)?;
        value.as_f64().ok_or_else(|| mismatch(index, "number", value))
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, PluginError> {
        let value = self.require(index)?;
        value.as_bool().ok_or_else(|| mismatch(index, "boolean", value))
    }

    pub fn get_object(&self, index: usize) -> Result<&Map<String, Value>, PluginError> {
        let value = self.require(index)?;
        value.as_object().ok_or_else(|| mismatch(index, "object", value))
    }

    pub fn get_array(&self, index: usize) -> Result<&Vec<Value>, PluginError> {
        let value = self.require(index)?;
        value.as_array().ok_or_else(|| mismatch(index, "array", value))
    }

    /// Decode a base64 string argument into bytes.
    pub fn get_bytes(&self, index: usize) -> Result<Vec<u8>, PluginError> {
        let encoded = self.get_str(index)?;
        STANDARD
            .decode(encoded)
            .map_err(|e| PluginError::Arguments(format!("argument {index} is not base64: {e}")))
    }

    pub fn opt_str<'a>(&'a self, index: usize, default: &'a str) -> &'a str {
        self.get(index).and_then(Value::as_str).unwrap_or(default)
    }

    pub fn opt_i64(&self, index: usize, default: i64) -> i64 {
        self.get(index).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn opt_bool(&self, index: usize, default: bool) -> bool {
        self.get(index).and_then(Value::as_bool).unwrap_or(default)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(index: usize, expected: &str, value: &Value) -> PluginError {
    PluginError::Arguments(format!(
        "argument {index}: expected {expected}, got {}",
        type_name(value)
    ))
}
