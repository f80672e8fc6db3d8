//! # handler-echo
//!
//! An echo service for exercising the bridge.
//!
//! It performs no I/O. Each action reflects its arguments back through a
//! different result shape (structured, binary, multipart, streamed) so hosts
//! and script-side test suites can verify delivery end to end.

use fusabi_bridge::{
    factory, ActionTable, CallbackContext, Placement, Plugin, PluginArgs, PluginEnv, PluginError,
    PluginFactory, PluginOutcome, PluginResult, Status,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Service name the echo handler registers under by default.
pub const SERVICE_NAME: &str = "Echo";

/// Handler type reference used in registration files.
pub const HANDLER_REF: &str = "echo";

/// Echo handler.
pub struct EchoPlugin {
    actions: ActionTable<EchoPlugin>,
    prefix: String,
    offload_delay: Duration,
    resets: AtomicUsize,
}

impl EchoPlugin {
    /// Create a new echo handler instance.
    pub fn new() -> Self {
        Self {
            actions: ActionTable::new()
                .inline("echo", EchoPlugin::echo)
                .offloaded("echoAsync", EchoPlugin::echo)
                .inline("echoArrayBuffer", EchoPlugin::echo_array_buffer)
                .inline("echoMultiPart", EchoPlugin::echo_multipart)
                .offloaded("stream", EchoPlugin::stream)
                .inline("fail", EchoPlugin::fail),
            prefix: String::new(),
            offload_delay: Duration::ZERO,
            resets: AtomicUsize::new(0),
        }
    }

    /// Number of page resets this instance has seen.
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    fn echo(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        self.pause();
        let reply = match args.get(0) {
            Some(Value::String(s)) => {
                PluginResult::string(Status::Ok, format!("{}{}", self.prefix, s))
            }
            Some(Value::Null) | None => PluginResult::optional_string(Status::Ok, None),
            Some(other) => PluginResult::json(Status::Ok, other.clone()),
        };
        ctx.send(reply);
        Ok(())
    }

    /// `[base64]` back as an array buffer.
    fn echo_array_buffer(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        let bytes = args.get_bytes(0)?;
        ctx.success_bytes(bytes);
        Ok(())
    }

    /// Every argument back as one multipart result, typed per argument.
    fn echo_multipart(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        let parts = args
            .as_slice()
            .iter()
            .map(|value| match value {
                Value::Null => PluginResult::null(Status::Ok),
                Value::Bool(b) => PluginResult::bool(Status::Ok, *b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => PluginResult::int(Status::Ok, i),
                    None => PluginResult::float(Status::Ok, n.as_f64().unwrap_or(f64::NAN)),
                },
                Value::String(s) => PluginResult::string(Status::Ok, s.clone()),
                other => PluginResult::json(Status::Ok, other.clone()),
            })
            .collect();
        ctx.send(PluginResult::multipart(Status::Ok, parts));
        Ok(())
    }

    /// `[count, payload]`: `count` keep-callback results, then a terminal one.
    fn stream(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        let count = args.get_i64(0)?;
        if count < 0 {
            return Err(PluginError::Arguments(format!("negative count {count}")));
        }
        let payload = args.get(1).cloned().unwrap_or(Value::Null);
        for seq in 0..count {
            self.pause();
            let event = serde_json::json!({ "seq": seq, "payload": payload });
            ctx.send(PluginResult::json(Status::Ok, event).with_keep_callback(true));
        }
        debug!(count, "Echo stream finished");
        ctx.success_int(count);
        Ok(())
    }

    fn fail(&self, args: &PluginArgs, _ctx: &CallbackContext) -> Result<(), PluginError> {
        Err(PluginError::Failed(args.opt_str(0, "echo failure").to_string()))
    }

    fn pause(&self) {
        if !self.offload_delay.is_zero() {
            thread::sleep(self.offload_delay);
        }
    }
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for EchoPlugin {
    /// Reads `prefix` (prepended to echoed strings) and `delay_ms` (a sleep
    /// before each reply) from the service settings.
    fn initialize(&mut self, env: &PluginEnv) {
        let settings = env.settings();
        if let Some(prefix) = settings.get("prefix").and_then(Value::as_str) {
            self.prefix = prefix.to_string();
        }
        if let Some(ms) = settings.get("delay_ms").and_then(Value::as_u64) {
            self.offload_delay = Duration::from_millis(ms);
        }
        info!(service = env.service(), "Echo handler initialized");
    }

    fn execute(&self, action: &str, args: &PluginArgs, ctx: &CallbackContext) -> PluginOutcome {
        self.actions.dispatch(self, action, args, ctx)
    }

    fn placement(&self, action: &str) -> Placement {
        self.actions.placement(action)
    }

    fn on_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn on_message(&self, id: &str, data: &Value) -> Option<Value> {
        (id == "echo").then(|| data.clone())
    }
}

/// Factory for registering the echo handler.
pub fn echo_factory() -> PluginFactory {
    factory(EchoPlugin::new)
}
