//! Error types for the bridge.

use thiserror::Error;

use crate::result::Status;

/// Errors raised by the bridge itself (resolution, arguments, access).
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No handler is registered under the service name.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The handler factory failed to produce an instance.
    #[error("Plugin instantiation failed for '{service}': {reason}")]
    Instantiation { service: String, reason: String },

    /// The raw argument payload could not be parsed.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// A script call presented the wrong bridge secret.
    #[error("Bridge access denied: {0}")]
    AccessDenied(String),

    /// A script call arrived while no bridge secret was issued.
    #[error("Bridge is disabled")]
    BridgeDisabled,

    /// The requested bridge mode index is unknown.
    #[error("Unsupported bridge mode: {0}")]
    UnsupportedBridgeMode(i32),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Status code reported to the script side for this error.
    pub fn status(&self) -> Status {
        match self {
            BridgeError::PluginNotFound(_) => Status::HandlerNotFound,
            BridgeError::Instantiation { .. } => Status::InstantiationFailure,
            BridgeError::InvalidArguments(_) | BridgeError::Json(_) => Status::MalformedArguments,
            BridgeError::AccessDenied(_) | BridgeError::BridgeDisabled => Status::AccessDenied,
            BridgeError::UnsupportedBridgeMode(_) => Status::Error,
        }
    }
}

/// Errors returned by handler code from [`Plugin::execute`](crate::Plugin::execute).
#[derive(Error, Debug)]
pub enum PluginError {
    /// An argument was missing or had the wrong type.
    #[error("Argument error: {0}")]
    Arguments(String),

    /// An I/O failure inside the handler.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure; the message is delivered to the script side.
    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    /// Status code reported to the script side for this error.
    pub fn status(&self) -> Status {
        match self {
            PluginError::Arguments(_) => Status::MalformedArguments,
            PluginError::Io(_) => Status::IoError,
            PluginError::Failed(_) => Status::Error,
        }
    }
}

impl From<BridgeError> for PluginError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidArguments(msg) => PluginError::Arguments(msg),
            other => PluginError::Failed(other.to_string()),
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type for handler execution.
pub type PluginOutcome = std::result::Result<bool, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_status_mapping() {
        assert_eq!(
            BridgeError::PluginNotFound("x".into()).status(),
            Status::HandlerNotFound
        );
        assert_eq!(
            BridgeError::InvalidArguments("bad".into()).status(),
            Status::MalformedArguments
        );
        assert_eq!(BridgeError::BridgeDisabled.status(), Status::AccessDenied);
    }

    #[test]
    fn test_plugin_error_status_mapping() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(PluginError::from(io).status(), Status::IoError);
        assert_eq!(
            PluginError::Arguments("missing".into()).status(),
            Status::MalformedArguments
        );
        assert_eq!(PluginError::Failed("boom".into()).status(), Status::Error);
    }
}
