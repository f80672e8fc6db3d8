//! Wire encodings for native-to-script messages.
//!
//! Two renderings exist for every queued message:
//!
//! - **Packed** (pull delivery): `<len> <body>` records, where `len` is the
//!   UTF-16 length of `body` as the script side measures strings. A callback
//!   body is `<S|F><1|0><status> <callbackId> <payload>`; a raw script body is
//!   `J<script>`.
//! - **Script** (direct evaluation): a ready-to-run statement that invokes
//!   [`CALLBACK_ENTRY`] with `(callbackId, success, status, [args], keepCallback)`.
//!
//! Payload tags in the packed form: `N` null, `t`/`f` bool, `n` number,
//! `s` string, `A` array buffer (base64), `S` binary string (base64),
//! `M` multipart, and structured values verbatim.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Number, Value};

use crate::queue::MessageBody;
use crate::result::{Payload, PluginResult};

/// Script-side function receiving callback results.
pub const CALLBACK_ENTRY: &str = "fusabi.callbackFromNative";

/// Script-side expression converting base64 into an `ArrayBuffer`.
pub const ARRAY_BUFFER_DECODER: &str = "fusabi.require('fusabi/base64').toArrayBuffer";

/// Statement that makes the script side pull again when a drain was cut short.
pub const POLL_RESUME: &str =
    "window.setTimeout(function(){fusabi.require('fusabi/polling').pollOnce();},0);";

/// Encode a payload into its structured-data text.
pub fn encode_payload(payload: &Payload) -> String {
    match payload {
        Payload::Null => "null".to_string(),
        Payload::Bool(b) => b.to_string(),
        Payload::Int(i) => i.to_string(),
        Payload::Float(f) => match Number::from_f64(*f) {
            Some(n) => n.to_string(),
            None => "null".to_string(),
        },
        Payload::String(s) => quote(s),
        Payload::Json(value) => escape_line_separators(value.to_string()),
        Payload::ArrayBuffer(bytes) | Payload::BinaryString(bytes) => STANDARD.encode(bytes),
        Payload::Multipart(parts) => {
            let mut out = String::new();
            push_js_parts(&mut out, parts);
            out
        }
    }
}

/// Quote a string using structured-data escaping rules.
///
/// U+2028 and U+2029 are escaped as well; older script engines treat them as
/// line terminators inside string literals.
pub fn quote(s: &str) -> String {
    escape_line_separators(Value::String(s.to_string()).to_string())
}

fn escape_line_separators(text: String) -> String {
    if text.contains(|c: char| c == '\u{2028}' || c == '\u{2029}') {
        text.replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029")
    } else {
        text
    }
}

/// Length of `s` as measured by the script runtime (UTF-16 code units).
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

// ============================================================================
// Packed (pull) encoding
// ============================================================================

/// Append one `<len> <body>` record for `body`.
pub fn pack_message(body: &MessageBody, out: &mut String) {
    let encoded = encode_as_message(body);
    out.push_str(&utf16_len(&encoded).to_string());
    out.push(' ');
    out.push_str(&encoded);
}

/// Packed length of a message, including its length prefix.
pub fn packed_length(body: &MessageBody) -> usize {
    let len = utf16_len(&encode_as_message(body));
    len + len.to_string().len() + 1
}

/// Encode a message body without its length prefix.
pub fn encode_as_message(body: &MessageBody) -> String {
    let mut out = String::new();
    match body {
        MessageBody::Script(script) => {
            out.push('J');
            out.push_str(script);
        }
        MessageBody::Callback {
            callback_id,
            result,
        } => {
            let status = result.status();
            out.push(if status.is_success() { 'S' } else { 'F' });
            out.push(if result.keep_callback() { '1' } else { '0' });
            out.push_str(&status.ordinal().to_string());
            out.push(' ');
            out.push_str(callback_id);
            out.push(' ');
            push_packed_payload(&mut out, result);
        }
    }
    out
}

fn push_packed_payload(out: &mut String, result: &PluginResult) {
    match result.payload() {
        Payload::Null => out.push('N'),
        Payload::Bool(b) => out.push(if *b { 't' } else { 'f' }),
        Payload::Int(_) | Payload::Float(_) => {
            out.push('n');
            out.push_str(result.encoded_message());
        }
        Payload::String(s) => {
            out.push('s');
            out.push_str(s);
        }
        Payload::BinaryString(_) => {
            out.push('S');
            out.push_str(result.encoded_message());
        }
        Payload::ArrayBuffer(_) => {
            out.push('A');
            out.push_str(result.encoded_message());
        }
        Payload::Multipart(parts) => {
            out.push('M');
            for part in parts {
                let mut encoded = String::new();
                push_packed_payload(&mut encoded, part);
                out.push_str(&utf16_len(&encoded).to_string());
                out.push(' ');
                out.push_str(&encoded);
            }
        }
        Payload::Json(_) => out.push_str(result.encoded_message()),
    }
}

// ============================================================================
// Script encoding
// ============================================================================

/// Render a message body as an executable script statement.
pub fn encode_as_js(body: &MessageBody, out: &mut String) {
    match body {
        MessageBody::Script(script) => out.push_str(script),
        MessageBody::Callback {
            callback_id,
            result,
        } => {
            let status = result.status();
            out.push_str(CALLBACK_ENTRY);
            out.push_str("('");
            push_escaped_id(out, callback_id);
            out.push_str("',");
            out.push_str(if status.is_success() { "true" } else { "false" });
            out.push(',');
            out.push_str(&status.ordinal().to_string());
            out.push_str(",[");
            match result.payload() {
                Payload::Multipart(parts) => push_js_parts(out, parts),
                _ => push_js_arg(out, result),
            }
            out.push_str("],");
            out.push_str(if result.keep_callback() { "true" } else { "false" });
            out.push_str(");");
        }
    }
}

fn push_js_parts(out: &mut String, parts: &[PluginResult]) {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_js_arg(out, part);
    }
}

fn push_js_arg(out: &mut String, result: &PluginResult) {
    match result.payload() {
        Payload::BinaryString(_) => {
            out.push_str("atob('");
            out.push_str(result.encoded_message());
            out.push_str("')");
        }
        Payload::ArrayBuffer(_) => {
            out.push_str(ARRAY_BUFFER_DECODER);
            out.push_str("('");
            out.push_str(result.encoded_message());
            out.push_str("')");
        }
        Payload::Null => out.push_str("null"),
        // Nested multiparts flatten into the surrounding argument list.
        Payload::Multipart(parts) => push_js_parts(out, parts),
        _ => out.push_str(result.encoded_message()),
    }
}

fn push_escaped_id(out: &mut String, callback_id: &str) {
    for c in callback_id.chars() {
        match c {
            '\'' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
}
