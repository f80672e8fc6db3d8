//! Line-delimited JSON frames exchanged with the script runtime.
//!
//! Every line on stdin is one [`InboundFrame`]; every line written to stdout
//! is one [`OutboundFrame`]. Frames are tagged by a `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame sent by the script runtime.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Invoke `service.action`.
    Exec {
        secret: String,
        service: String,
        action: String,
        callback_id: String,
        /// Argument array.
        #[serde(default = "empty_args")]
        args: Value,
    },
    /// Pull pending messages.
    Retrieve {
        secret: String,
        #[serde(default)]
        from_online_event: bool,
    },
    /// Switch the bridge mode by index.
    SetBridgeMode { secret: String, mode: i32 },
    /// Ask whether a navigation may proceed.
    Navigate { url: String },
    /// Broadcast a message to instantiated handlers.
    Message {
        id: String,
        #[serde(default)]
        data: Value,
    },
    /// A lifecycle transition of the hosting surface.
    Lifecycle {
        event: LifecycleEvent,
        #[serde(default)]
        multitasking: bool,
    },
}

fn empty_args() -> Value {
    Value::Array(Vec::new())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Pause,
    Resume,
    /// The page was reloaded; pending messages are dropped and a new secret
    /// is issued.
    Reset,
    /// The host is going away.
    Destroy,
}

/// A frame sent to the script runtime.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// The bridge is up (or was reset) and accepts calls with `secret`.
    Ready {
        secret: String,
        mode: String,
        modes: Vec<String>,
        version: String,
    },
    /// Reply to an `exec` frame.
    ExecResult {
        callback_id: String,
        /// Pending messages in pull encoding, when exec chaining returned any.
        #[serde(skip_serializing_if = "Option::is_none")]
        messages: Option<String>,
    },
    /// Reply to a `retrieve` frame.
    Messages {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
    },
    /// A script to evaluate.
    Eval { script: String },
    /// Set the runtime's network-availability flag.
    Network { online: bool },
    /// Set the runtime's "messages pending" flag.
    Pending { pending: bool },
    /// Reply to a `navigate` frame.
    Navigation {
        url: String,
        allowed: bool,
        intercepted: bool,
    },
    /// Reply to a `message` frame that a handler answered.
    Reply { id: String, data: Value },
    Error {
        message: String,
        /// Status ordinal, when the error maps to one.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u8>,
    },
}

impl OutboundFrame {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundFrame::Error {
            message: message.into(),
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_exec_frame() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"exec","secret":"s","service":"Echo","action":"echo","callback_id":"Echo1","args":["hi"]}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::Exec {
                secret: "s".into(),
                service: "Echo".into(),
                action: "echo".into(),
                callback_id: "Echo1".into(),
                args: json!(["hi"]),
            }
        );
    }

    #[test]
    fn test_defaults() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"exec","secret":"s","service":"A","action":"b","callback_id":"c"}"#,
        )
        .unwrap();
        assert!(matches!(frame, InboundFrame::Exec { args, .. } if args == json!([])));

        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"lifecycle","event":"pause"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Lifecycle {
                event: LifecycleEvent::Pause,
                multitasking: false
            }
        );
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_outbound_frame_shape() {
        let frame = OutboundFrame::ExecResult {
            callback_id: "c1".into(),
            messages: None,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"type": "exec_result", "callback_id": "c1"})
        );

        let frame = OutboundFrame::Pending { pending: true };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"pending","pending":true}"#
        );
    }
}
