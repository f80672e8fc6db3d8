//! Invocation dispatch: from a script call to a plugin action.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::callback::CallbackContext;
use crate::error::PluginError;
use crate::plugin::{Placement, Plugin};
use crate::queue::OutboundQueue;
use crate::registry::PluginRegistry;
use crate::result::{PluginResult, Status};

/// Inline actions slower than this are logged.
pub const DEFAULT_SLOW_EXEC_WARNING: Duration = Duration::from_millis(16);

/// Routes script invocations to plugins.
///
/// Inline actions run on the calling thread. Offloaded actions run on the
/// runtime's blocking pool and deliver their results through the queue
/// whenever they finish. Plugin failures, including panics, become a terminal
/// error result for the invocation; they never reach the caller.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    queue: OutboundQueue,
    runtime: Handle,
    slow_exec_warning: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, queue: OutboundQueue, runtime: Handle) -> Self {
        Self {
            registry,
            queue,
            runtime,
            slow_exec_warning: DEFAULT_SLOW_EXEC_WARNING,
        }
    }

    pub fn with_slow_exec_warning(mut self, threshold: Duration) -> Self {
        self.slow_exec_warning = threshold;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Execute one invocation.
    ///
    /// # Arguments
    ///
    /// * `service` - Registered service name
    /// * `action` - Action understood by that service
    /// * `callback_id` - Script-side id results are addressed to
    /// * `raw_args` - Argument array in structured-data text
    ///
    /// # Returns
    ///
    /// `true` if a terminal result was already queued when this returns.
    /// Offloaded actions always return `false`.
    pub fn invoke(&self, service: &str, action: &str, callback_id: &str, raw_args: &str) -> bool {
        let ctx = CallbackContext::new(callback_id, self.queue.clone());

        let plugin = match self.registry.resolve(service) {
            Ok(plugin) => plugin,
            Err(e) => {
                warn!(service = %service, action = %action, "Cannot dispatch: {}", e);
                ctx.send(PluginResult::new(e.status()));
                return true;
            }
        };

        match plugin.placement(action) {
            Placement::Inline => {
                let started = Instant::now();
                run_guarded(&self.registry, plugin.as_ref(), service, action, raw_args, &ctx);
                let elapsed = started.elapsed();
                if elapsed > self.slow_exec_warning {
                    warn!(
                        service = %service,
                        action = %action,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Plugin action blocked the calling thread; consider offloading it"
                    );
                }
                ctx.is_finished()
            }
            Placement::Offloaded => {
                let registry = Arc::clone(&self.registry);
                let service = service.to_string();
                let action = action.to_string();
                let raw_args = raw_args.to_string();
                debug!(service = %service, action = %action, "Offloading plugin action");
                self.runtime.spawn_blocking(move || {
                    run_guarded(&registry, plugin.as_ref(), &service, &action, &raw_args, &ctx);
                });
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("slow_exec_warning", &self.slow_exec_warning)
            .finish()
    }
}

fn run_guarded(
    registry: &PluginRegistry,
    plugin: &dyn Plugin,
    service: &str,
    action: &str,
    raw_args: &str,
    ctx: &CallbackContext,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        registry.run(plugin, service, action, raw_args, ctx)
    }));

    match outcome {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!(service = %service, action = %action, "Plugin action failed: {}", e);
            ctx.send(failure_result(&e));
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(service = %service, action = %action, "Plugin action panicked: {}", message);
            ctx.send(PluginResult::string(Status::Error, message));
        }
    }
}

fn failure_result(err: &PluginError) -> PluginResult {
    PluginResult::string(err.status(), err.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "plugin panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::PluginArgs;
    use crate::plugin::factory;

    struct Sensor;

    impl Plugin for Sensor {
        fn execute(&self, action: &str, args: &PluginArgs, ctx: &CallbackContext) -> Result<bool, PluginError> {
            match action {
                "ok" => {
                    ctx.success_string(args.get_str(0)?);
                    Ok(true)
                }
                "later" => Ok(true),
                "bad_args" => {
                    args.get_i64(5)?;
                    Ok(true)
                }
                "panic" => panic!("sensor exploded"),
                "bg" => {
                    ctx.success_int(7);
                    Ok(true)
                }
                "bg_panic" => panic!("worker exploded"),
                _ => Ok(false),
            }
        }

        fn placement(&self, action: &str) -> Placement {
            if action.starts_with("bg") {
                Placement::Offloaded
            } else {
                Placement::Inline
            }
        }
    }

    fn dispatcher() -> (Dispatcher, OutboundQueue) {
        let queue = OutboundQueue::detached();
        let registry = Arc::new(PluginRegistry::new(queue.clone()));
        registry.register("Sensor", factory(|| Sensor), false);
        (
            Dispatcher::new(registry, queue.clone(), Handle::current()),
            queue,
        )
    }

    #[tokio::test]
    async fn test_inline_success() {
        let (dispatcher, queue) = dispatcher();
        assert!(dispatcher.invoke("Sensor", "ok", "c1", r#"["hi"]"#));
        assert_eq!(queue.pop_and_encode(false).as_deref(), Some("10 S01 c1 shi"));
    }

    #[tokio::test]
    async fn test_inline_pending_result() {
        let (dispatcher, queue) = dispatcher();
        assert!(!dispatcher.invoke("Sensor", "later", "c1", "[]"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_argument_error_maps_to_malformed_arguments() {
        let (dispatcher, queue) = dispatcher();
        assert!(dispatcher.invoke("Sensor", "bad_args", "c1", "[]"));
        let packed = queue.pop_and_encode(false).unwrap();
        assert!(packed.contains("F08 c1 s"), "{packed}");
    }

    #[tokio::test]
    async fn test_panic_becomes_error_result() {
        let (dispatcher, queue) = dispatcher();
        assert!(dispatcher.invoke("Sensor", "panic", "c1", "[]"));
        let packed = queue.pop_and_encode(false).unwrap();
        assert!(packed.ends_with("F09 c1 ssensor exploded"), "{packed}");
    }

    #[tokio::test]
    async fn test_unknown_service_and_action() {
        let (dispatcher, queue) = dispatcher();
        assert!(dispatcher.invoke("Missing", "x", "c1", "[]"));
        assert!(dispatcher.invoke("Sensor", "nope", "c2", "[]"));
        assert_eq!(
            queue.pop_and_encode(false).as_deref(),
            Some("23 F02 c1 sClass not found22 F07 c2 sInvalid action")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_offloaded_returns_before_result() {
        let (dispatcher, queue) = dispatcher();
        assert!(!dispatcher.invoke("Sensor", "bg", "c1", "[]"));

        for _ in 0..200 {
            if !queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(queue.pop_and_encode(false).as_deref(), Some("9 S01 c1 n7"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_offloaded_panic_becomes_error_result() {
        let (dispatcher, queue) = dispatcher();
        assert!(!dispatcher.invoke("Sensor", "bg_panic", "c1", "[]"));

        for _ in 0..200 {
            if !queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let packed = queue.pop_and_encode(false).unwrap();
        assert!(packed.ends_with("F09 c1 sworker exploded"), "{packed}");
    }
}
