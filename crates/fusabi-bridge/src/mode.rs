//! Bridge modes: strategies for getting queued messages into the script runtime.
//!
//! A mode never touches the runtime itself. It emits signals through a
//! [`ScriptSurface`], which the host wires to the single thread that owns the
//! runtime. That thread then drains the queue (`pop_and_encode_as_js` for
//! [`EvalMode`]) or waits for the script side to pull (`pop_and_encode`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Identifies a bridge mode. The discriminant is the index the script side
/// uses when it selects a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeModeKind {
    /// Nothing is pushed; messages wait for an explicit pull.
    NoOp = 0,
    /// The script side polls, gated by a cheap "messages pending" flag.
    Polling = 1,
    /// The runtime is nudged to pull by toggling its network-availability flag.
    OnlineEvents = 2,
    /// The native side evaluates script statements directly.
    Eval = 3,
}

impl BridgeModeKind {
    pub const ALL: [BridgeModeKind; 4] = [
        BridgeModeKind::NoOp,
        BridgeModeKind::Polling,
        BridgeModeKind::OnlineEvents,
        BridgeModeKind::Eval,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BridgeModeKind::NoOp => "no_op",
            BridgeModeKind::Polling => "polling",
            BridgeModeKind::OnlineEvents => "online_events",
            BridgeModeKind::Eval => "eval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for BridgeModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The runtime-facing side of the bridge, as seen by bridge modes.
///
/// Implementations must not block: they are called while the queue lock is
/// held, possibly from worker threads.
pub trait ScriptSurface: Send + Sync {
    /// Ask the runtime-owning thread to drain and evaluate pending messages.
    fn request_flush(&self);

    /// Set the runtime's network-availability flag.
    fn set_network_available(&self, online: bool);

    /// Publish whether messages are waiting to be pulled.
    fn set_messages_pending(&self, pending: bool);
}

/// A surface that drops every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl ScriptSurface for NullSurface {
    fn request_flush(&self) {}
    fn set_network_available(&self, _online: bool) {}
    fn set_messages_pending(&self, _pending: bool) {}
}

/// A signal for the runtime-owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSignal {
    Flush,
    NetworkAvailable(bool),
    MessagesPending(bool),
}

/// A [`ScriptSurface`] that forwards signals over an unbounded channel.
#[derive(Debug, Clone)]
pub struct SignalSurface {
    tx: mpsc::UnboundedSender<RuntimeSignal>,
}

impl SignalSurface {
    /// Create a surface and the receiver the runtime-owning thread reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RuntimeSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, signal: RuntimeSignal) {
        if self.tx.send(signal).is_err() {
            trace!(?signal, "Runtime signal dropped, receiver closed");
        }
    }
}

impl ScriptSurface for SignalSurface {
    fn request_flush(&self) {
        self.emit(RuntimeSignal::Flush);
    }

    fn set_network_available(&self, online: bool) {
        self.emit(RuntimeSignal::NetworkAvailable(online));
    }

    fn set_messages_pending(&self, pending: bool) {
        self.emit(RuntimeSignal::MessagesPending(pending));
    }
}

/// A delivery strategy. Callbacks run with the queue lock held.
pub trait BridgeMode: Send {
    fn kind(&self) -> BridgeModeKind;

    /// Called when the mode becomes active.
    fn reset(&mut self) {}

    /// Called after an enqueue (or unpause) while `pending` messages wait.
    fn on_message_available(&mut self, _pending: usize) {}

    /// Called at the start of every pull, before anything is removed.
    fn notify_of_flush(&mut self, _from_online_event: bool) {}

    /// Called after messages were removed; `remaining` are still queued.
    fn on_drained(&mut self, _remaining: usize) {}
}

/// Inert mode: messages are only delivered when pulled.
#[derive(Debug, Default)]
pub struct NoOpMode;

impl BridgeMode for NoOpMode {
    fn kind(&self) -> BridgeModeKind {
        BridgeModeKind::NoOp
    }
}

/// Pull mode that keeps the runtime's "messages pending" flag current.
pub struct PollingMode {
    surface: Arc<dyn ScriptSurface>,
    published: Option<bool>,
}

impl PollingMode {
    pub fn new(surface: Arc<dyn ScriptSurface>) -> Self {
        Self {
            surface,
            published: None,
        }
    }

    fn publish(&mut self, pending: bool) {
        if self.published != Some(pending) {
            self.published = Some(pending);
            self.surface.set_messages_pending(pending);
        }
    }
}

impl BridgeMode for PollingMode {
    fn kind(&self) -> BridgeModeKind {
        BridgeModeKind::Polling
    }

    fn reset(&mut self) {
        self.published = None;
        self.publish(false);
    }

    fn on_message_available(&mut self, pending: usize) {
        self.publish(pending > 0);
    }

    fn on_drained(&mut self, remaining: usize) {
        self.publish(remaining > 0);
    }
}

/// Signals pending messages by flipping the runtime's online flag; the
/// runtime pulls from its online/offline event handler.
pub struct OnlineEventsMode {
    surface: Arc<dyn ScriptSurface>,
    online: bool,
    ignore_next_flush: bool,
}

impl OnlineEventsMode {
    pub fn new(surface: Arc<dyn ScriptSurface>) -> Self {
        Self {
            surface,
            online: false,
            ignore_next_flush: false,
        }
    }
}

impl BridgeMode for OnlineEventsMode {
    fn kind(&self) -> BridgeModeKind {
        BridgeModeKind::OnlineEvents
    }

    fn reset(&mut self) {
        self.online = false;
        // The runtime fires an event for the reset toggle itself; that pull
        // must not flip our notion of the current flag.
        self.ignore_next_flush = true;
        self.surface.set_network_available(true);
    }

    fn on_message_available(&mut self, pending: usize) {
        if pending > 0 {
            self.ignore_next_flush = false;
            self.surface.set_network_available(self.online);
        }
    }

    fn notify_of_flush(&mut self, from_online_event: bool) {
        if from_online_event && !self.ignore_next_flush {
            self.online = !self.online;
        }
    }
}

/// Direct evaluation: asks the runtime-owning thread to drain and evaluate.
pub struct EvalMode {
    surface: Arc<dyn ScriptSurface>,
}

impl EvalMode {
    pub fn new(surface: Arc<dyn ScriptSurface>) -> Self {
        Self { surface }
    }
}

impl BridgeMode for EvalMode {
    fn kind(&self) -> BridgeModeKind {
        BridgeModeKind::Eval
    }

    fn on_message_available(&mut self, _pending: usize) {
        self.surface.request_flush();
    }
}

/// Build one instance of every mode, ordered by [`BridgeModeKind::index`].
pub fn standard_modes(surface: Arc<dyn ScriptSurface>) -> Vec<Box<dyn BridgeMode>> {
    vec![
        Box::new(NoOpMode),
        Box::new(PollingMode::new(Arc::clone(&surface))),
        Box::new(OnlineEventsMode::new(Arc::clone(&surface))),
        Box::new(EvalMode::new(surface)),
    ]
}
