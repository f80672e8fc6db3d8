//! The script-facing entry points.
//!
//! Every call from the script side carries the secret handed out by
//! [`Bridge::generate_secret`]. A call with the wrong secret disables the
//! bridge until a new secret is generated.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, BridgeResult};
use crate::mode::BridgeModeKind;
use crate::queue::OutboundQueue;

pub struct Bridge {
    dispatcher: Dispatcher,
    queue: OutboundQueue,
    secret: Mutex<Option<String>>,
    exec_chaining: bool,
}

/// Unpauses the queue when a dispatch ends, even by unwinding.
struct PauseGuard<'a>(&'a OutboundQueue);

impl<'a> PauseGuard<'a> {
    fn new(queue: &'a OutboundQueue) -> Self {
        queue.set_paused(true);
        Self(queue)
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.0.set_paused(false);
    }
}

impl Bridge {
    pub fn new(dispatcher: Dispatcher) -> Self {
        let queue = dispatcher.queue().clone();
        Self {
            dispatcher,
            queue,
            secret: Mutex::new(None),
            exec_chaining: true,
        }
    }

    /// Return queued messages from `js_exec` directly instead of waiting for
    /// the next pull.
    pub fn with_exec_chaining(mut self, enabled: bool) -> Self {
        self.exec_chaining = enabled;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.secret.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Issue a fresh secret, replacing any earlier one.
    pub fn generate_secret(&self) -> String {
        let secret = Uuid::new_v4().to_string();
        *self.lock() = Some(secret.clone());
        debug!("Generated bridge secret");
        secret
    }

    pub fn clear_secret(&self) {
        *self.lock() = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    fn verify_secret(&self, origin: &str, secret: &str) -> BridgeResult<()> {
        let mut current = self.lock();
        match current.as_deref() {
            None => {
                error!(origin, "Bridge access attempt while disabled");
                Err(BridgeError::BridgeDisabled)
            }
            Some(expected) if expected == secret => Ok(()),
            Some(_) => {
                *current = None;
                error!(origin, "Bridge access attempt with wrong secret; bridge disabled");
                Err(BridgeError::AccessDenied(origin.to_string()))
            }
        }
    }

    /// Dispatch one invocation.
    ///
    /// # Returns
    ///
    /// Pending messages packed for pull delivery when exec chaining is on and
    /// any are queued, otherwise `None`.
    pub fn js_exec(
        &self,
        secret: &str,
        service: &str,
        action: &str,
        callback_id: &str,
        raw_args: &str,
    ) -> BridgeResult<Option<String>> {
        self.verify_secret("exec", secret)?;

        // Chained messages are drained before unpausing, so the active mode
        // is never told about messages this call already returns.
        let _paused = PauseGuard::new(&self.queue);
        self.dispatcher.invoke(service, action, callback_id, raw_args);

        if self.exec_chaining {
            Ok(self.queue.pop_and_encode(false))
        } else {
            Ok(None)
        }
    }

    /// Switch the bridge mode by script-side index.
    pub fn js_set_bridge_mode(&self, secret: &str, index: i32) -> BridgeResult<()> {
        self.verify_secret("set_bridge_mode", secret)?;
        self.queue.set_bridge_mode_index(index)
    }

    /// Drain pending messages for a pull.
    pub fn js_retrieve_messages(
        &self,
        secret: &str,
        from_online_event: bool,
    ) -> BridgeResult<Option<String>> {
        self.verify_secret("retrieve_messages", secret)?;
        Ok(self.queue.pop_and_encode(from_online_event))
    }

    /// Push a raw script statement to the runtime.
    pub fn send_javascript(&self, statement: impl Into<String>) -> u64 {
        self.queue.enqueue_script(statement)
    }

    pub fn bridge_mode(&self) -> BridgeModeKind {
        self.queue.bridge_mode()
    }

    /// Page reset: drop pending messages and revoke the secret.
    pub fn reset(&self) {
        self.queue.reset();
        self.clear_secret();
        info!("Bridge reset");
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("enabled", &self.is_enabled())
            .field("exec_chaining", &self.exec_chaining)
            .field("mode", &self.bridge_mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::PluginArgs;
    use crate::callback::CallbackContext;
    use crate::error::PluginError;
    use crate::plugin::{factory, Plugin};
    use crate::registry::PluginRegistry;
    use crate::mode::{RuntimeSignal, SignalSurface};
    use std::sync::Arc;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Ping;

    impl Plugin for Ping {
        fn execute(&self, _action: &str, _args: &PluginArgs, ctx: &CallbackContext) -> Result<bool, PluginError> {
            ctx.success_string("pong");
            Ok(true)
        }
    }

    fn bridge() -> Bridge {
        bridge_on(OutboundQueue::detached())
    }

    fn bridge_on(queue: OutboundQueue) -> Bridge {
        let registry = Arc::new(PluginRegistry::new(queue.clone()));
        registry.register("Ping", factory(|| Ping), false);
        Bridge::new(Dispatcher::new(registry, queue, Handle::current()))
    }

    fn drain(signals: &mut UnboundedReceiver<RuntimeSignal>) -> Vec<RuntimeSignal> {
        let mut seen = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            seen.push(signal);
        }
        seen
    }

    #[tokio::test]
    async fn test_disabled_until_secret_generated() {
        let bridge = bridge();
        assert!(matches!(
            bridge.js_exec("x", "Ping", "p", "c1", "[]"),
            Err(BridgeError::BridgeDisabled)
        ));
        assert!(bridge.queue().is_empty());
    }

    #[tokio::test]
    async fn test_exec_chaining_returns_messages() {
        let bridge = bridge();
        let secret = bridge.generate_secret();
        let packed = bridge.js_exec(&secret, "Ping", "p", "c1", "[]").unwrap();
        assert_eq!(packed.as_deref(), Some("12 S01 c1 spong"));
        assert!(!bridge.queue().is_paused());
    }

    #[tokio::test]
    async fn test_chained_exec_sends_no_signals() {
        for mode in [
            BridgeModeKind::Polling,
            BridgeModeKind::OnlineEvents,
            BridgeModeKind::Eval,
        ] {
            let (surface, mut signals) = SignalSurface::channel();
            let bridge = bridge_on(OutboundQueue::new(Arc::new(surface)));
            let secret = bridge.generate_secret();
            bridge.js_set_bridge_mode(&secret, mode.index() as i32).unwrap();
            drain(&mut signals);

            let packed = bridge.js_exec(&secret, "Ping", "p", "c1", "[]").unwrap();
            assert_eq!(packed.as_deref(), Some("12 S01 c1 spong"), "{mode}");
            assert!(bridge.queue().is_empty());
            assert_eq!(drain(&mut signals), Vec::new(), "{mode}");
        }
    }

    #[tokio::test]
    async fn test_unchained_exec_announces_messages() {
        let (surface, mut signals) = SignalSurface::channel();
        let bridge = bridge_on(OutboundQueue::new(Arc::new(surface))).with_exec_chaining(false);
        let secret = bridge.generate_secret();
        bridge.js_set_bridge_mode(&secret, 3).unwrap();
        drain(&mut signals);

        bridge.js_exec(&secret, "Ping", "p", "c1", "[]").unwrap();
        assert_eq!(drain(&mut signals), vec![RuntimeSignal::Flush]);
    }

    #[tokio::test]
    async fn test_exec_without_chaining_leaves_messages_queued() {
        let bridge = bridge().with_exec_chaining(false);
        let secret = bridge.generate_secret();
        assert_eq!(bridge.js_exec(&secret, "Ping", "p", "c1", "[]").unwrap(), None);
        assert_eq!(
            bridge.js_retrieve_messages(&secret, false).unwrap().as_deref(),
            Some("12 S01 c1 spong")
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_disables_bridge() {
        let bridge = bridge();
        let secret = bridge.generate_secret();
        assert!(matches!(
            bridge.js_retrieve_messages("guess", false),
            Err(BridgeError::AccessDenied(_))
        ));
        assert!(!bridge.is_enabled());
        assert!(matches!(
            bridge.js_set_bridge_mode(&secret, 1),
            Err(BridgeError::BridgeDisabled)
        ));
    }

    #[tokio::test]
    async fn test_set_bridge_mode_and_reset() {
        let bridge = bridge();
        let secret = bridge.generate_secret();
        bridge.js_set_bridge_mode(&secret, 3).unwrap();
        assert_eq!(bridge.bridge_mode(), BridgeModeKind::Eval);
        assert!(matches!(
            bridge.js_set_bridge_mode(&secret, 9),
            Err(BridgeError::UnsupportedBridgeMode(9))
        ));

        bridge.send_javascript("go();");
        bridge.reset();
        assert!(bridge.queue().is_empty());
        assert!(!bridge.is_enabled());
        assert_eq!(bridge.bridge_mode(), BridgeModeKind::NoOp);
    }
}
