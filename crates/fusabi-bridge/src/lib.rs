//! # fusabi-bridge
//!
//! Message bridge between native plugins and a script runtime.
//!
//! Scripts invoke named actions on native services; results travel back
//! asynchronously as callback messages through an ordered outbound queue.
//!
//! - [`PluginRegistry`] maps service names to lazily created [`Plugin`]s
//! - [`Dispatcher`] runs actions inline or on a worker thread
//! - [`CallbackContext`] delivers results, at most one of them terminal
//! - [`OutboundQueue`] buffers messages and drains them through a
//!   [`BridgeMode`]
//! - [`Bridge`] is the secret-checked entry point the script side calls
//!
//! ## Threading
//!
//! Plugins and callback contexts may be used from any thread. Only the thread
//! that owns the script runtime drains the queue; bridge modes talk to it
//! through a [`ScriptSurface`], usually a [`SignalSurface`] channel.

pub mod args;
pub mod bridge;
pub mod callback;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod mode;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod result;

pub use args::PluginArgs;
pub use bridge::Bridge;
pub use callback::CallbackContext;
pub use dispatch::{Dispatcher, DEFAULT_SLOW_EXEC_WARNING};
pub use error::{BridgeError, BridgeResult, PluginError, PluginOutcome};
pub use mode::{
    BridgeMode, BridgeModeKind, NullSurface, RuntimeSignal, ScriptSurface, SignalSurface,
};
pub use plugin::{factory, ActionFn, ActionTable, Placement, Plugin, PluginEnv, PluginFactory};
pub use queue::{
    MessageBody, OutboundMessage, OutboundQueue, QueueOptions, QueueStats,
    DEFAULT_COMBINED_RESPONSE_CUTOFF,
};
pub use registry::{DispatchOutcome, PluginEntry, PluginRegistry};
pub use result::{MessageType, Payload, PluginResult, Status};
