//! Callback contexts: one per script invocation.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::queue::OutboundQueue;
use crate::result::{PluginResult, Status};

struct CallbackState {
    finished: bool,
    delivered: usize,
}

struct CallbackInner {
    callback_id: String,
    queue: OutboundQueue,
    state: Mutex<CallbackState>,
}

/// Delivers results for one script callback.
///
/// Any number of keep-callback results may be sent; the first result without
/// keep-callback is terminal and every send after it is dropped with a
/// warning. The finished check, the state update and the enqueue happen in one
/// critical section, so the terminal result is always the last message this
/// context puts on the queue and concurrent sends keep their order.
///
/// Clones share state, so a context can be handed to worker threads.
#[derive(Clone)]
pub struct CallbackContext {
    inner: Arc<CallbackInner>,
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("callback_id", &self.inner.callback_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl CallbackContext {
    pub fn new(callback_id: impl Into<String>, queue: OutboundQueue) -> Self {
        Self {
            inner: Arc::new(CallbackInner {
                callback_id: callback_id.into(),
                queue,
                state: Mutex::new(CallbackState {
                    finished: false,
                    delivered: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallbackState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn callback_id(&self) -> &str {
        &self.inner.callback_id
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Number of results handed to the queue so far.
    pub fn delivered(&self) -> usize {
        self.lock().delivered
    }

    /// Send a result. Returns `false` if the context was already finished and
    /// the result was dropped.
    pub fn send(&self, result: PluginResult) -> bool {
        let mut state = self.lock();
        if state.finished {
            warn!(
                callback_id = %self.inner.callback_id,
                dropped = result.encoded_message(),
                "Attempted to send a second callback after the terminal result"
            );
            return false;
        }
        state.finished = !result.keep_callback();
        if self
            .inner
            .queue
            .enqueue_result(&self.inner.callback_id, result)
            .is_some()
        {
            state.delivered += 1;
        }
        true
    }

    /// Terminal `Ok` with the status message as payload.
    pub fn success(&self) -> bool {
        self.send(PluginResult::new(Status::Ok))
    }

    pub fn success_string(&self, message: impl Into<String>) -> bool {
        self.send(PluginResult::string(Status::Ok, message))
    }

    pub fn success_json(&self, value: Value) -> bool {
        self.send(PluginResult::json(Status::Ok, value))
    }

    pub fn success_int(&self, value: i64) -> bool {
        self.send(PluginResult::int(Status::Ok, value))
    }

    pub fn success_bytes(&self, bytes: Vec<u8>) -> bool {
        self.send(PluginResult::array_buffer(Status::Ok, bytes))
    }

    /// Terminal `Error` carrying `message`.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.send(PluginResult::string(Status::Error, message))
    }

    pub fn error_json(&self, value: Value) -> bool {
        self.send(PluginResult::json(Status::Error, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_result_finishes_context() {
        let queue = OutboundQueue::detached();
        let ctx = CallbackContext::new("cb1", queue.clone());

        assert!(ctx.send(PluginResult::string(Status::Ok, "a").with_keep_callback(true)));
        assert!(!ctx.is_finished());
        assert!(ctx.success_string("b"));
        assert!(ctx.is_finished());
        assert!(!ctx.error("late"));

        assert_eq!(ctx.delivered(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_deferral_is_not_delivered() {
        let queue = OutboundQueue::detached();
        let ctx = CallbackContext::new("cb1", queue.clone());

        assert!(ctx.send(PluginResult::new(Status::NoResult).with_keep_callback(true)));
        assert!(!ctx.is_finished());
        assert_eq!(ctx.delivered(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let queue = OutboundQueue::detached();
        let ctx = CallbackContext::new("cb1", queue);
        let other = ctx.clone();
        ctx.success();
        assert!(other.is_finished());
        assert!(!other.success());
    }
}
