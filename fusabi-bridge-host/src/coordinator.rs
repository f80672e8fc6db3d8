//! The coordinating task.
//!
//! One task owns the script-runtime boundary: it reads inbound frames, runs
//! invocations through the [`Bridge`], turns bridge-mode signals into outbound
//! frames, and is the only writer of the output stream. Worker threads never
//! write frames; their results reach this task through the outbound queue and
//! the [`RuntimeSignal`] channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fusabi_bridge::{
    Bridge, BridgeError, BridgeModeKind, Dispatcher, OutboundQueue, PluginRegistry,
    RuntimeSignal, SignalSurface,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::catalog::HandlerCatalog;
use crate::config::Config;
use crate::protocol::{InboundFrame, LifecycleEvent, OutboundFrame};

/// Destination for outbound frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;
}

/// Writes frames as JSON lines.
pub struct LineSink<W> {
    writer: W,
}

impl<W> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for LineSink<W> {
    async fn send(&mut self, frame: OutboundFrame) -> Result<()> {
        let mut line = serde_json::to_string(&frame).context("Failed to encode frame")?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write frame")?;
        self.writer.flush().await.context("Failed to flush frame")?;
        Ok(())
    }
}

/// Why the frame loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The input stream closed.
    InputClosed,
    /// A `destroy` lifecycle frame arrived.
    Destroyed,
}

pub struct Coordinator {
    bridge: Bridge,
    registry: Arc<PluginRegistry>,
    initial_mode: BridgeModeKind,
}

impl Coordinator {
    /// Build the bridge stack described by `config`.
    ///
    /// # Returns
    /// The coordinator and the signal receiver to pass to [`Coordinator::run`].
    pub fn new(
        config: &Config,
        catalog: &HandlerCatalog,
        runtime: Handle,
    ) -> Result<(Self, UnboundedReceiver<RuntimeSignal>)> {
        let initial_mode = config.bridge_mode()?;
        let (surface, signals) = SignalSurface::channel();
        let queue = OutboundQueue::with_options(Arc::new(surface), config.queue_options());

        let registry = Arc::new(PluginRegistry::new(queue.clone()));
        catalog.populate(&registry, &config.plugins)?;

        let dispatcher = Dispatcher::new(Arc::clone(&registry), queue, runtime)
            .with_slow_exec_warning(config.slow_exec_warning());
        let bridge = Bridge::new(dispatcher).with_exec_chaining(config.host.exec_chaining);

        Ok((
            Self {
                bridge,
                registry,
                initial_mode,
            },
            signals,
        ))
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Put the bridge in its initial mode and issue a fresh secret.
    fn start_page(&self) -> OutboundFrame {
        self.bridge.queue().set_bridge_mode(self.initial_mode);
        let secret = self.bridge.generate_secret();
        OutboundFrame::Ready {
            secret,
            mode: self.initial_mode.as_str().to_string(),
            modes: BridgeModeKind::ALL
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Run the frame loop until the input closes or a `destroy` arrives.
    pub async fn run<R, S>(
        &self,
        input: R,
        mut signals: UnboundedReceiver<RuntimeSignal>,
        sink: &mut S,
    ) -> Result<StopReason>
    where
        R: AsyncBufRead + Unpin,
        S: FrameSink,
    {
        sink.send(self.start_page()).await?;
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read input")? else {
                        info!("Input closed");
                        return Ok(StopReason::InputClosed);
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let frame = match serde_json::from_str::<InboundFrame>(&line) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Malformed frame: {}", e);
                            sink.send(OutboundFrame::error(format!("Malformed frame: {e}"))).await?;
                            continue;
                        }
                    };
                    let destroy = matches!(
                        frame,
                        InboundFrame::Lifecycle { event: LifecycleEvent::Destroy, .. }
                    );
                    for reply in self.handle_frame(frame) {
                        sink.send(reply).await?;
                    }
                    if destroy {
                        return Ok(StopReason::Destroyed);
                    }
                }
                Some(signal) = signals.recv() => {
                    if let Some(frame) = self.handle_signal(signal) {
                        sink.send(frame).await?;
                    }
                }
            }
        }
    }

    /// Handle one inbound frame and return the frames to send back.
    pub fn handle_frame(&self, frame: InboundFrame) -> Vec<OutboundFrame> {
        match frame {
            InboundFrame::Exec {
                secret,
                service,
                action,
                callback_id,
                args,
            } => {
                let raw_args = args.to_string();
                match self
                    .bridge
                    .js_exec(&secret, &service, &action, &callback_id, &raw_args)
                {
                    Ok(messages) => vec![OutboundFrame::ExecResult {
                        callback_id,
                        messages,
                    }],
                    Err(e) => vec![bridge_error(e)],
                }
            }
            InboundFrame::Retrieve {
                secret,
                from_online_event,
            } => match self.bridge.js_retrieve_messages(&secret, from_online_event) {
                Ok(payload) => vec![OutboundFrame::Messages { payload }],
                Err(e) => vec![bridge_error(e)],
            },
            InboundFrame::SetBridgeMode { secret, mode } => {
                match self.bridge.js_set_bridge_mode(&secret, mode) {
                    Ok(()) => Vec::new(),
                    Err(e) => vec![bridge_error(e)],
                }
            }
            InboundFrame::Navigate { url } => {
                let intercepted = self.registry.on_override_url_loading(&url);
                let allowed =
                    !intercepted && self.registry.should_allow_navigation(&url).unwrap_or(true);
                debug!(url = %url, allowed, intercepted, "Navigation checked");
                vec![OutboundFrame::Navigation {
                    url,
                    allowed,
                    intercepted,
                }]
            }
            InboundFrame::Message { id, data } => match self.registry.post_message(&id, &data) {
                Some(data) => vec![OutboundFrame::Reply { id, data }],
                None => Vec::new(),
            },
            InboundFrame::Lifecycle {
                event,
                multitasking,
            } => self.handle_lifecycle(event, multitasking),
        }
    }

    fn handle_lifecycle(&self, event: LifecycleEvent, multitasking: bool) -> Vec<OutboundFrame> {
        info!(?event, "Lifecycle event");
        match event {
            LifecycleEvent::Pause => {
                self.registry.on_pause(multitasking);
                Vec::new()
            }
            LifecycleEvent::Resume => {
                self.registry.on_resume(multitasking);
                Vec::new()
            }
            LifecycleEvent::Reset => {
                self.bridge.reset();
                self.registry.on_reset();
                vec![self.start_page()]
            }
            LifecycleEvent::Destroy => {
                self.shutdown();
                Vec::new()
            }
        }
    }

    /// Translate a bridge-mode signal into a frame.
    pub fn handle_signal(&self, signal: RuntimeSignal) -> Option<OutboundFrame> {
        match signal {
            RuntimeSignal::Flush => self
                .bridge
                .queue()
                .pop_and_encode_as_js()
                .map(|script| OutboundFrame::Eval { script }),
            RuntimeSignal::NetworkAvailable(online) => Some(OutboundFrame::Network { online }),
            RuntimeSignal::MessagesPending(pending) => Some(OutboundFrame::Pending { pending }),
        }
    }

    /// Destroy live handlers and disable the bridge.
    pub fn shutdown(&self) {
        self.bridge.reset();
        self.registry.shutdown();
    }
}

fn bridge_error(err: BridgeError) -> OutboundFrame {
    OutboundFrame::Error {
        message: err.to_string(),
        status: Some(err.status().ordinal()),
    }
}
