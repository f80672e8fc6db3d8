//! The outbound (native-to-script) message queue.
//!
//! Producers on any thread append messages; the thread that owns the script
//! runtime drains them in FIFO order through the active [`BridgeMode`]. The
//! queue never reorders, coalesces or drops messages. Only [`OutboundQueue::reset`]
//! discards them.
//!
//! Growth is unbounded. An optional high-water mark logs a warning and invokes
//! a monitoring hook when crossed, without limiting the queue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

use crate::codec;
use crate::error::{BridgeError, BridgeResult};
use crate::mode::{standard_modes, BridgeMode, BridgeModeKind, NullSurface, ScriptSurface};
use crate::result::PluginResult;

/// Upper bound, in encoded characters, for one combined drain. A drain always
/// includes at least one message.
pub const DEFAULT_COMBINED_RESPONSE_CUTOFF: usize = 16 * 1024 * 1024;

/// Marker appended to a pull response when messages were left behind.
pub const MORE_PENDING_MARKER: char = '*';

/// What a queued message delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// A result for a pending script callback.
    Callback {
        callback_id: String,
        result: PluginResult,
    },
    /// A raw script statement pushed by native code.
    Script(String),
}

/// A message owned by the queue from enqueue until drained.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    pub body: MessageBody,
}

impl OutboundMessage {
    pub fn callback_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Callback { callback_id, .. } => Some(callback_id),
            MessageBody::Script(_) => None,
        }
    }

    /// The encoded payload (or the script text for raw statements).
    pub fn encoded_payload(&self) -> &str {
        match &self.body {
            MessageBody::Callback { result, .. } => result.encoded_message(),
            MessageBody::Script(script) => script,
        }
    }
}

/// Invoked with the current length when the high-water mark is crossed.
pub type HighWaterHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Tunables for an [`OutboundQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub combined_response_cutoff: usize,
    pub high_water_mark: Option<usize>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            combined_response_cutoff: DEFAULT_COMBINED_RESPONSE_CUTOFF,
            high_water_mark: None,
        }
    }
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub len: usize,
    pub enqueued: u64,
    pub drained: u64,
    pub mode: BridgeModeKind,
    pub paused: bool,
    pub last_drain: Option<DateTime<Utc>>,
}

struct QueueInner {
    messages: VecDeque<OutboundMessage>,
    modes: Vec<Box<dyn BridgeMode>>,
    active: BridgeModeKind,
    paused: bool,
    next_sequence: u64,
    enqueued: u64,
    drained: u64,
    last_drain: Option<DateTime<Utc>>,
    options: QueueOptions,
    high_water_hook: Option<HighWaterHook>,
    above_mark: bool,
}

impl QueueInner {
    fn mode_mut(&mut self) -> &mut dyn BridgeMode {
        self.modes[self.active.index()].as_mut()
    }

    fn notify_available(&mut self) {
        let pending = self.messages.len();
        if !self.paused && pending > 0 {
            self.mode_mut().on_message_available(pending);
        }
    }

    fn take_front(&mut self, count: usize) -> Vec<OutboundMessage> {
        let taken: Vec<_> = self.messages.drain(..count).collect();
        self.drained += taken.len() as u64;
        self.last_drain = Some(Utc::now());

        let remaining = self.messages.len();
        if let Some(mark) = self.options.high_water_mark {
            if remaining <= mark {
                self.above_mark = false;
            }
        }
        self.mode_mut().on_drained(remaining);
        taken
    }
}

/// Thread-safe FIFO of pending native-to-script messages.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("OutboundQueue")
            .field("len", &inner.messages.len())
            .field("mode", &inner.active)
            .field("paused", &inner.paused)
            .finish()
    }
}

impl OutboundQueue {
    /// Create a queue whose modes signal through `surface`. Starts in
    /// [`BridgeModeKind::NoOp`].
    pub fn new(surface: Arc<dyn ScriptSurface>) -> Self {
        Self::with_options(surface, QueueOptions::default())
    }

    pub fn with_options(surface: Arc<dyn ScriptSurface>, options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                messages: VecDeque::new(),
                modes: standard_modes(surface),
                active: BridgeModeKind::NoOp,
                paused: false,
                next_sequence: 0,
                enqueued: 0,
                drained: 0,
                last_drain: None,
                options,
                high_water_hook: None,
                above_mark: false,
            })),
        }
    }

    /// A queue with no runtime attached; only pull delivery works.
    pub fn detached() -> Self {
        Self::new(Arc::new(NullSurface))
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the high-water-mark monitoring hook.
    pub fn set_high_water_hook(&self, hook: HighWaterHook) {
        self.lock().high_water_hook = Some(hook);
    }

    /// Append a message and return its sequence number.
    pub fn enqueue(&self, body: MessageBody) -> u64 {
        let (sequence, fire) = {
            let mut inner = self.lock();
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            inner.enqueued += 1;
            inner.messages.push_back(OutboundMessage {
                sequence,
                enqueued_at: Utc::now(),
                body,
            });
            inner.notify_available();

            let len = inner.messages.len();
            let mut fire = None;
            if let Some(mark) = inner.options.high_water_mark {
                if len > mark && !inner.above_mark {
                    inner.above_mark = true;
                    warn!(len, mark, "Outbound queue exceeded its high-water mark");
                    fire = inner.high_water_hook.clone().map(|hook| (hook, len));
                }
            }
            (sequence, fire)
        };

        // The hook runs outside the lock so it may inspect the queue.
        if let Some((hook, len)) = fire {
            hook(len);
        }
        trace!(sequence, "Enqueued outbound message");
        sequence
    }

    /// Queue a result for `callback_id`.
    ///
    /// Deferrals (`NoResult` with keep-callback) are not delivered.
    pub fn enqueue_result(&self, callback_id: &str, result: PluginResult) -> Option<u64> {
        if callback_id.is_empty() {
            error!(payload = result.encoded_message(), "Got plugin result with no callback id");
            return None;
        }
        if result.is_deferral() {
            trace!(callback_id, "Skipping deferral result");
            return None;
        }
        Some(self.enqueue(MessageBody::Callback {
            callback_id: callback_id.to_string(),
            result,
        }))
    }

    /// Queue a raw script statement.
    pub fn enqueue_script(&self, statement: impl Into<String>) -> u64 {
        self.enqueue(MessageBody::Script(statement.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// Remove the oldest messages and return them packed for pull delivery.
    ///
    /// Returns `None` when nothing is queued. A trailing
    /// [`MORE_PENDING_MARKER`] means the cutoff left messages behind.
    pub fn pop_and_encode(&self, from_online_event: bool) -> Option<String> {
        let mut inner = self.lock();
        inner.mode_mut().notify_of_flush(from_online_event);
        if inner.messages.is_empty() {
            return None;
        }

        let cutoff = inner.options.combined_response_cutoff;
        let mut total = 0;
        let mut count = 0;
        for message in &inner.messages {
            let size = codec::packed_length(&message.body);
            if count > 0 && total + size > cutoff {
                break;
            }
            total += size;
            count += 1;
        }

        let taken = inner.take_front(count);
        let mut out = String::with_capacity(total + 1);
        for message in &taken {
            codec::pack_message(&message.body, &mut out);
        }
        if !inner.messages.is_empty() {
            out.push(MORE_PENDING_MARKER);
        }
        debug!(count, remaining = inner.messages.len(), "Drained messages for pull");
        Some(out)
    }

    /// Remove the oldest messages and render them as one script.
    ///
    /// Statements are chained with `try{..}finally{..}` so a throwing callback
    /// does not stop delivery of the ones after it. Returns `None` when
    /// nothing is queued.
    pub fn pop_and_encode_as_js(&self) -> Option<String> {
        let mut inner = self.lock();
        if inner.messages.is_empty() {
            return None;
        }

        let cutoff = inner.options.combined_response_cutoff;
        let mut total = 0;
        let mut rendered = Vec::new();
        for message in &inner.messages {
            let mut js = String::new();
            codec::encode_as_js(&message.body, &mut js);
            let size = codec::utf16_len(&js);
            if !rendered.is_empty() && total + size > cutoff {
                break;
            }
            total += size;
            rendered.push(js);
        }

        let count = rendered.len();
        inner.take_front(count);
        let sends_all = inner.messages.is_empty();

        let mut out = String::new();
        for (i, js) in rendered.iter().enumerate() {
            if sends_all && i + 1 == count {
                out.push_str(js);
            } else {
                out.push_str("try{");
                out.push_str(js);
                out.push_str("}finally{");
            }
        }
        if !sends_all {
            out.push_str(codec::POLL_RESUME);
        }
        let closers = if sends_all { count - 1 } else { count };
        for _ in 0..closers {
            out.push('}');
        }
        debug!(count, remaining = inner.messages.len(), "Drained messages as script");
        Some(out)
    }

    pub fn bridge_mode(&self) -> BridgeModeKind {
        self.lock().active
    }

    /// Switch the delivery strategy. Queued messages are kept and, unless the
    /// queue is paused, announced to the new mode.
    pub fn set_bridge_mode(&self, kind: BridgeModeKind) {
        let mut inner = self.lock();
        if inner.active == kind {
            return;
        }
        debug!(from = %inner.active, to = %kind, "Switching bridge mode");
        inner.active = kind;
        inner.mode_mut().reset();
        inner.notify_available();
    }

    /// Switch modes by script-side index.
    pub fn set_bridge_mode_index(&self, index: i32) -> BridgeResult<()> {
        let kind =
            BridgeModeKind::from_index(index).ok_or(BridgeError::UnsupportedBridgeMode(index))?;
        self.set_bridge_mode(kind);
        Ok(())
    }

    /// While paused, the active mode is not told about new messages.
    pub fn set_paused(&self, paused: bool) {
        let mut inner = self.lock();
        if inner.paused && paused {
            error!("Nested call to set_paused detected");
        }
        inner.paused = paused;
        if !paused {
            inner.notify_available();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Discard all queued messages and return to the no-op mode.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let dropped = inner.messages.len();
        inner.messages.clear();
        inner.above_mark = false;
        inner.active = BridgeModeKind::NoOp;
        inner.mode_mut().reset();
        debug!(dropped, "Outbound queue reset");
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            len: inner.messages.len(),
            enqueued: inner.enqueued,
            drained: inner.drained,
            mode: inner.active,
            paused: inner.paused,
            last_drain: inner.last_drain,
        }
    }
}
