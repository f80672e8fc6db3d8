//! Typed outcomes produced by handlers.
//!
//! A [`PluginResult`] pairs a [`Status`] with a typed [`Payload`] and the
//! `keep_callback` flag. The payload is encoded once, at construction, into the
//! structured-data form the script runtime consumes; the queue later re-wraps
//! that encoding for whichever bridge mode drains it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;

/// Status codes understood by the script side.
///
/// Ordinals are stable and are sent over the wire as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NoResult = 0,
    Ok = 1,
    HandlerNotFound = 2,
    AccessDenied = 3,
    InstantiationFailure = 4,
    MalformedTarget = 5,
    IoError = 6,
    InvalidAction = 7,
    MalformedArguments = 8,
    Error = 9,
}

impl Status {
    const ALL: [Status; 10] = [
        Status::NoResult,
        Status::Ok,
        Status::HandlerNotFound,
        Status::AccessDenied,
        Status::InstantiationFailure,
        Status::MalformedTarget,
        Status::IoError,
        Status::InvalidAction,
        Status::MalformedArguments,
        Status::Error,
    ];

    /// Wire ordinal of this status.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Look up a status by its wire ordinal.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// Human-readable message used when a result carries no explicit payload.
    pub fn message(self) -> &'static str {
        match self {
            Status::NoResult => "No result",
            Status::Ok => "OK",
            Status::HandlerNotFound => "Class not found",
            Status::AccessDenied => "Illegal access",
            Status::InstantiationFailure => "Instantiation error",
            Status::MalformedTarget => "Malformed url",
            Status::IoError => "IO error",
            Status::InvalidAction => "Invalid action",
            Status::MalformedArguments => "JSON error",
            Status::Error => "Error",
        }
    }

    /// Whether the script side treats this status as a success callback.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::NoResult)
    }
}

/// Payload type tag, mirrored by the script-side decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    String = 1,
    Json = 2,
    Number = 3,
    Boolean = 4,
    Null = 5,
    ArrayBuffer = 6,
    BinaryString = 7,
    Multipart = 8,
}

/// The typed value carried by a result.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Structured value (object, array or any other JSON value).
    Json(Value),
    /// Raw bytes delivered as an `ArrayBuffer`.
    ArrayBuffer(Vec<u8>),
    /// Raw bytes delivered as a binary string.
    BinaryString(Vec<u8>),
    /// Several results delivered in one callback invocation.
    Multipart(Vec<PluginResult>),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Null => MessageType::Null,
            Payload::Bool(_) => MessageType::Boolean,
            Payload::Int(_) | Payload::Float(_) => MessageType::Number,
            Payload::String(_) => MessageType::String,
            Payload::Json(_) => MessageType::Json,
            Payload::ArrayBuffer(_) => MessageType::ArrayBuffer,
            Payload::BinaryString(_) => MessageType::BinaryString,
            Payload::Multipart(_) => MessageType::Multipart,
        }
    }
}

/// An immutable handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginResult {
    status: Status,
    payload: Payload,
    encoded: String,
    keep_callback: bool,
}

impl PluginResult {
    fn build(status: Status, payload: Payload) -> Self {
        let encoded = codec::encode_payload(&payload);
        Self {
            status,
            payload,
            encoded,
            keep_callback: false,
        }
    }

    /// A result whose payload is the status's own message.
    pub fn new(status: Status) -> Self {
        Self::string(status, status.message())
    }

    pub fn null(status: Status) -> Self {
        Self::build(status, Payload::Null)
    }

    pub fn string(status: Status, message: impl Into<String>) -> Self {
        Self::build(status, Payload::String(message.into()))
    }

    /// A string result; `None` is delivered as `null`.
    pub fn optional_string(status: Status, message: Option<String>) -> Self {
        match message {
            Some(message) => Self::string(status, message),
            None => Self::null(status),
        }
    }

    pub fn json(status: Status, value: Value) -> Self {
        Self::build(status, Payload::Json(value))
    }

    pub fn list(status: Status, values: Vec<Value>) -> Self {
        Self::build(status, Payload::Json(Value::Array(values)))
    }

    pub fn int(status: Status, value: i64) -> Self {
        Self::build(status, Payload::Int(value))
    }

    /// Non-finite values have no structured-data form and encode as `null`.
    pub fn float(status: Status, value: f64) -> Self {
        Self::build(status, Payload::Float(value))
    }

    pub fn bool(status: Status, value: bool) -> Self {
        Self::build(status, Payload::Bool(value))
    }

    pub fn array_buffer(status: Status, bytes: Vec<u8>) -> Self {
        Self::build(status, Payload::ArrayBuffer(bytes))
    }

    pub fn binary_string(status: Status, bytes: Vec<u8>) -> Self {
        Self::build(status, Payload::BinaryString(bytes))
    }

    pub fn multipart(status: Status, parts: Vec<PluginResult>) -> Self {
        Self::build(status, Payload::Multipart(parts))
    }

    /// Return this result with `keep_callback` set.
    pub fn with_keep_callback(mut self, keep_callback: bool) -> Self {
        self.keep_callback = keep_callback;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// The payload in its encoded, script-consumable form.
    pub fn encoded_message(&self) -> &str {
        &self.encoded
    }

    /// The raw (unquoted) string for string payloads.
    pub fn str_message(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn keep_callback(&self) -> bool {
        self.keep_callback
    }

    /// A `NoResult` with `keep_callback` only announces a later response and is
    /// never delivered.
    pub fn is_deferral(&self) -> bool {
        self.status == Status::NoResult && self.keep_callback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_ordinals_are_stable() {
        assert_eq!(Status::NoResult.ordinal(), 0);
        assert_eq!(Status::Ok.ordinal(), 1);
        assert_eq!(Status::InvalidAction.ordinal(), 7);
        assert_eq!(Status::Error.ordinal(), 9);
        assert_eq!(Status::from_ordinal(8), Some(Status::MalformedArguments));
        assert_eq!(Status::from_ordinal(10), None);
    }

    #[test]
    fn test_status_only_result_carries_message() {
        let result = PluginResult::new(Status::HandlerNotFound);
        assert_eq!(result.str_message(), Some("Class not found"));
        assert_eq!(result.encoded_message(), "\"Class not found\"");
        assert!(!result.keep_callback());
    }

    #[test]
    fn test_optional_string_none_is_null() {
        let result = PluginResult::optional_string(Status::Ok, None);
        assert_eq!(result.message_type(), MessageType::Null);
        assert_eq!(result.encoded_message(), "null");
    }

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(PluginResult::int(Status::Ok, 37).encoded_message(), "37");
        assert_eq!(PluginResult::bool(Status::Ok, false).encoded_message(), "false");
        assert_eq!(PluginResult::float(Status::Ok, 1.5).encoded_message(), "1.5");
        assert_eq!(
            PluginResult::float(Status::Ok, f64::NAN).encoded_message(),
            "null"
        );
    }

    #[test]
    fn test_structured_payload_not_double_encoded() {
        let result = PluginResult::json(Status::Ok, json!({"a": [1, 2]}));
        assert_eq!(result.encoded_message(), r#"{"a":[1,2]}"#);
        assert_eq!(result.message_type(), MessageType::Json);
    }

    #[test]
    fn test_deferral() {
        let deferral = PluginResult::new(Status::NoResult).with_keep_callback(true);
        assert!(deferral.is_deferral());
        assert!(!PluginResult::new(Status::NoResult).is_deferral());
        assert!(!PluginResult::new(Status::Ok)
            .with_keep_callback(true)
            .is_deferral());
    }
}
