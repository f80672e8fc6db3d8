//! End-to-end behaviour of the bridge: registry, dispatch, callbacks and queue.

use fusabi_bridge::{
    factory, ActionTable, Bridge, BridgeModeKind, CallbackContext, Dispatcher, MessageBody,
    OutboundQueue, Placement, Plugin, PluginArgs, PluginError, PluginOutcome, PluginRegistry,
    PluginResult, RuntimeSignal, SignalSurface, Status,
};
use serde_json::json;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;

struct Device {
    actions: ActionTable<Device>,
}

impl Device {
    fn new() -> Self {
        Self {
            actions: ActionTable::new()
                .inline("info", Device::info)
                .inline("watch", Device::watch)
                .offloaded("scan", Device::scan),
        }
    }

    fn info(&self, _args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        ctx.success_json(json!({"model": "test", "cores": 4}));
        Ok(())
    }

    fn watch(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        let ticks = args.get_i64(0)?;
        for tick in 0..ticks {
            ctx.send(PluginResult::int(Status::Ok, tick).with_keep_callback(true));
        }
        ctx.success_string("done");
        Ok(())
    }

    fn scan(&self, args: &PluginArgs, ctx: &CallbackContext) -> Result<(), PluginError> {
        thread::sleep(Duration::from_millis(20));
        ctx.success_string(args.opt_str(0, "all"));
        Ok(())
    }
}

impl Plugin for Device {
    fn execute(&self, action: &str, args: &PluginArgs, ctx: &CallbackContext) -> PluginOutcome {
        self.actions.dispatch(self, action, args, ctx)
    }

    fn placement(&self, action: &str) -> Placement {
        self.actions.placement(action)
    }
}

fn setup(queue: OutboundQueue) -> Dispatcher {
    let registry = Arc::new(PluginRegistry::new(queue.clone()));
    registry.register("Device", factory(Device::new), false);
    Dispatcher::new(registry, queue, Handle::current())
}

async fn wait_for_messages(queue: &OutboundQueue) {
    for _ in 0..200 {
        if !queue.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test]
fn test_concurrent_sends_deliver_one_terminal_last() {
    let queue = OutboundQueue::detached();
    let ctx = CallbackContext::new("race", queue.clone());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for n in 0..50 {
                    ctx.send(PluginResult::int(Status::Ok, n).with_keep_callback(true));
                }
                ctx.send(PluginResult::int(Status::Ok, i));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(ctx.is_finished());
    let mut terminal_positions = Vec::new();
    let mut total = 0;
    while let Some(packed) = queue.pop_and_encode(false) {
        for (i, record) in packed.split(" S").skip(1).enumerate() {
            if record.starts_with("01 race ") {
                terminal_positions.push(total + i);
            }
        }
        total += packed.matches(" race ").count();
    }

    assert_eq!(terminal_positions.len(), 1);
    assert_eq!(terminal_positions[0], total - 1);
    assert_eq!(total, ctx.delivered());
}

#[test]
fn test_results_for_one_callback_keep_order() {
    let queue = OutboundQueue::detached();
    let ctx = CallbackContext::new("cb", queue.clone());
    let other = CallbackContext::new("other", queue.clone());

    ctx.send(PluginResult::string(Status::Ok, "R1").with_keep_callback(true));
    other.success();
    ctx.send(PluginResult::string(Status::Ok, "R2"));

    assert_eq!(
        queue.pop_and_encode(false).as_deref(),
        Some("10 S11 cb sR113 S01 other sOK10 S01 cb sR2")
    );
}

#[test]
fn test_multipart_renders_as_one_call() {
    let queue = OutboundQueue::detached();
    let parts = vec![
        PluginResult::bool(Status::Ok, true),
        PluginResult::int(Status::Ok, 1),
        PluginResult::json(Status::Ok, json!([0, 1, 2, 3, 4])),
        PluginResult::bool(Status::Ok, false),
    ];
    queue.enqueue_result("37", PluginResult::multipart(Status::Ok, parts));

    assert_eq!(
        queue.pop_and_encode_as_js().as_deref(),
        Some("fusabi.callbackFromNative('37',true,1,[true,1,[0,1,2,3,4],false],false);")
    );
}

#[test]
fn test_null_string_renders_null_sentinel() {
    let queue = OutboundQueue::detached();
    queue.enqueue_result("n1", PluginResult::optional_string(Status::Ok, None));

    assert_eq!(
        queue.pop_and_encode_as_js().as_deref(),
        Some("fusabi.callbackFromNative('n1',true,1,[null],false);")
    );
}

#[test]
fn test_empty_queue() {
    let queue = OutboundQueue::detached();
    assert!(queue.is_empty());
    assert_eq!(queue.pop_and_encode(false), None);
    assert_eq!(queue.pop_and_encode_as_js(), None);

    queue.enqueue(MessageBody::Script("x();".into()));
    assert!(!queue.is_empty());
}

#[tokio::test]
async fn test_unknown_service_runs_no_handler_code() {
    let queue = OutboundQueue::detached();
    let dispatcher = setup(queue.clone());

    assert!(dispatcher.invoke("NoSuchService", "x", "cb1", "[]"));
    assert!(!dispatcher.registry().is_instantiated("Device"));
    assert_eq!(
        queue.pop_and_encode(false).as_deref(),
        Some("24 F02 cb1 sClass not found")
    );
}

#[tokio::test]
async fn test_unrecognized_action() {
    let queue = OutboundQueue::detached();
    let dispatcher = setup(queue.clone());

    assert!(dispatcher.invoke("Device", "selfDestruct", "cb1", "[]"));
    assert_eq!(
        queue.pop_and_encode(false).as_deref(),
        Some("23 F07 cb1 sInvalid action")
    );
}

#[tokio::test]
async fn test_streaming_action_ends_with_terminal() {
    let queue = OutboundQueue::detached();
    let dispatcher = setup(queue.clone());

    assert!(dispatcher.invoke("Device", "watch", "w", "[2]"));
    assert_eq!(
        queue.pop_and_encode(false).as_deref(),
        Some("8 S11 w n08 S11 w n111 S01 w sdone")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offloaded_action_completes_through_queue() {
    let queue = OutboundQueue::detached();
    let dispatcher = setup(queue.clone());

    assert!(!dispatcher.invoke("Device", "scan", "s1", r#"["ble"]"#));
    wait_for_messages(&queue).await;
    assert_eq!(queue.pop_and_encode(false).as_deref(), Some("11 S01 s1 sble"));
}

#[tokio::test]
async fn test_mode_switch_keeps_queued_messages() {
    let (surface, mut signals) = SignalSurface::channel();
    let queue = OutboundQueue::new(Arc::new(surface));
    let dispatcher = setup(queue.clone());

    queue.set_bridge_mode(BridgeModeKind::Polling);
    dispatcher.invoke("Device", "info", "i1", "[]");
    queue.set_bridge_mode(BridgeModeKind::Eval);
    assert_eq!(queue.len(), 1);

    let mut seen = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        seen.push(signal);
    }
    assert!(seen.contains(&RuntimeSignal::MessagesPending(true)));
    assert_eq!(seen.last(), Some(&RuntimeSignal::Flush));

    let js = queue.pop_and_encode_as_js().unwrap();
    assert!(js.starts_with("fusabi.callbackFromNative('i1',true,1,[{"));
}

#[tokio::test]
async fn test_bridge_round_trip() {
    let queue = OutboundQueue::detached();
    let bridge = Bridge::new(setup(queue));
    let secret = bridge.generate_secret();

    let packed = bridge.js_exec(&secret, "Device", "watch", "b1", "[1]").unwrap();
    assert_eq!(packed.as_deref(), Some("9 S11 b1 n012 S01 b1 sdone"));
    assert_eq!(bridge.js_retrieve_messages(&secret, false).unwrap(), None);
}
