//! # Plugin Registry
//!
//! Maps service names to plugin factories, instantiates plugins lazily and
//! caches them, and runs actions against them.
//!
//! Creation is serialized per service: each entry guards its own instance
//! slot, so concurrent first calls for one service create exactly one plugin
//! while other services resolve independently. Lifecycle broadcasts reach
//! instantiated plugins only, in registration order.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::args::PluginArgs;
use crate::callback::CallbackContext;
use crate::error::{BridgeError, BridgeResult, PluginError};
use crate::plugin::{Plugin, PluginEnv, PluginFactory};
use crate::queue::OutboundQueue;
use crate::result::{PluginResult, Status};

/// A registration: how to build one service's plugin.
#[derive(Clone)]
pub struct PluginEntry {
    pub service: String,
    pub factory: PluginFactory,
    /// Instantiate at registration (and on [`PluginRegistry::init`]) instead of
    /// on first use.
    pub eager: bool,
    /// URL prefixes routed to this service by
    /// [`PluginRegistry::on_override_url_loading`].
    pub url_filters: Vec<String>,
    pub settings: Value,
}

impl PluginEntry {
    pub fn new(service: impl Into<String>, factory: PluginFactory) -> Self {
        Self {
            service: service.into(),
            factory,
            eager: false,
            url_filters: Vec::new(),
            settings: Value::Null,
        }
    }

    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    pub fn with_url_filter(mut self, prefix: impl Into<String>) -> Self {
        self.url_filters.push(prefix.into());
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("service", &self.service)
            .field("eager", &self.eager)
            .field("url_filters", &self.url_filters)
            .finish()
    }
}

struct ServiceSlot {
    entry: PluginEntry,
    instance: Mutex<Option<Arc<dyn Plugin>>>,
}

impl ServiceSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn Plugin>>> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn instance(&self) -> Option<Arc<dyn Plugin>> {
        self.lock().clone()
    }
}

#[derive(Default)]
struct Services {
    order: Vec<String>,
    slots: HashMap<String, Arc<ServiceSlot>>,
}

/// How a dispatched invocation was settled by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The plugin recognized the action.
    Handled,
    /// The registry answered on the plugin's behalf with this status.
    Synthesized(Status),
}

/// Registry of plugin services.
pub struct PluginRegistry {
    services: RwLock<Services>,
    queue: OutboundQueue,
}

impl PluginRegistry {
    /// Create an empty registry whose plugins push events into `queue`.
    pub fn new(queue: OutboundQueue) -> Self {
        Self {
            services: RwLock::new(Services::default()),
            queue,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Services> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Services> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, service: &str) -> Option<Arc<ServiceSlot>> {
        self.read().slots.get(service).cloned()
    }

    /// Register a service.
    pub fn register(&self, service: impl Into<String>, factory: PluginFactory, eager: bool) {
        self.register_entry(PluginEntry::new(service, factory).eager(eager));
    }

    /// Register a service from a full entry.
    ///
    /// The last registration for a name wins; it keeps the name's original
    /// position in the broadcast order and discards any cached instance.
    pub fn register_entry(&self, entry: PluginEntry) {
        let service = entry.service.clone();
        let eager = entry.eager;
        let slot = Arc::new(ServiceSlot {
            entry,
            instance: Mutex::new(None),
        });

        {
            let mut services = self.write();
            if services.slots.insert(service.clone(), slot).is_some() {
                debug!(service = %service, "Replaced existing plugin registration");
            } else {
                services.order.push(service.clone());
            }
        }
        info!(service = %service, eager, "Registered plugin");

        if eager {
            if let Err(e) = self.resolve(&service) {
                warn!(service = %service, "Eager plugin failed to start: {}", e);
            }
        }
    }

    /// Get the plugin for `service`, creating it on first use.
    pub fn resolve(&self, service: &str) -> BridgeResult<Arc<dyn Plugin>> {
        let slot = self
            .slot(service)
            .ok_or_else(|| BridgeError::PluginNotFound(service.to_string()))?;

        let mut instance = slot.lock();
        if let Some(plugin) = instance.as_ref() {
            return Ok(Arc::clone(plugin));
        }

        let mut plugin = (slot.entry.factory)().map_err(|e| BridgeError::Instantiation {
            service: service.to_string(),
            reason: e.to_string(),
        })?;
        let env = PluginEnv::new(service, self.queue.clone(), slot.entry.settings.clone());
        plugin.initialize(&env);

        let plugin: Arc<dyn Plugin> = Arc::from(plugin);
        *instance = Some(Arc::clone(&plugin));
        debug!(service = %service, "Instantiated plugin");
        Ok(plugin)
    }

    /// Resolve `service` and run `action` inline.
    ///
    /// Resolution and argument failures are answered on `ctx` without running
    /// plugin code. Errors returned by the plugin are passed up unhandled.
    pub fn dispatch(
        &self,
        service: &str,
        action: &str,
        raw_args: &str,
        ctx: &CallbackContext,
    ) -> Result<DispatchOutcome, PluginError> {
        match self.resolve(service) {
            Ok(plugin) => self.run(plugin.as_ref(), service, action, raw_args, ctx),
            Err(e) => {
                warn!(service = %service, action = %action, "Cannot dispatch: {}", e);
                let status = e.status();
                ctx.send(PluginResult::new(status));
                Ok(DispatchOutcome::Synthesized(status))
            }
        }
    }

    /// Run `action` on an already-resolved plugin.
    pub fn run(
        &self,
        plugin: &dyn Plugin,
        service: &str,
        action: &str,
        raw_args: &str,
        ctx: &CallbackContext,
    ) -> Result<DispatchOutcome, PluginError> {
        let args = match PluginArgs::parse(raw_args) {
            Ok(args) => args,
            Err(e) => {
                warn!(service = %service, action = %action, "Malformed arguments: {}", e);
                ctx.send(PluginResult::new(Status::MalformedArguments));
                return Ok(DispatchOutcome::Synthesized(Status::MalformedArguments));
            }
        };

        if plugin.execute(action, &args, ctx)? {
            Ok(DispatchOutcome::Handled)
        } else {
            debug!(service = %service, action = %action, "Unrecognized action");
            ctx.send(PluginResult::new(Status::InvalidAction));
            Ok(DispatchOutcome::Synthesized(Status::InvalidAction))
        }
    }

    /// Instantiated plugins in registration order.
    fn live(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        let slots: Vec<_> = {
            let services = self.read();
            services
                .order
                .iter()
                .filter_map(|name| services.slots.get(name).cloned())
                .collect()
        };
        slots
            .into_iter()
            .filter_map(|slot| slot.instance().map(|p| (slot.entry.service.clone(), p)))
            .collect()
    }

    pub fn on_pause(&self, multitasking: bool) {
        for (_, plugin) in self.live() {
            plugin.on_pause(multitasking);
        }
    }

    pub fn on_resume(&self, multitasking: bool) {
        for (_, plugin) in self.live() {
            plugin.on_resume(multitasking);
        }
    }

    pub fn on_destroy(&self) {
        for (_, plugin) in self.live() {
            plugin.on_destroy();
        }
    }

    /// Tell plugins the page was reset. Cached instances are kept.
    pub fn on_reset(&self) {
        for (_, plugin) in self.live() {
            plugin.on_reset();
        }
    }

    /// Broadcast a message; the first plugin that replies wins.
    pub fn post_message(&self, id: &str, data: &Value) -> Option<Value> {
        self.live()
            .into_iter()
            .find_map(|(_, plugin)| plugin.on_message(id, data))
    }

    /// Offer `url` to services whose url filters match it, instantiating them
    /// if needed. Returns `true` if one of them took over the load.
    pub fn on_override_url_loading(&self, url: &str) -> bool {
        let candidates: Vec<String> = {
            let services = self.read();
            services
                .order
                .iter()
                .filter(|name| {
                    services.slots.get(*name).is_some_and(|slot| {
                        slot.entry
                            .url_filters
                            .iter()
                            .any(|prefix| url.starts_with(prefix.as_str()))
                    })
                })
                .cloned()
                .collect()
        };

        for service in candidates {
            match self.resolve(&service) {
                Ok(plugin) => {
                    if plugin.on_override_url_loading(url) {
                        debug!(service = %service, url = %url, "URL load intercepted");
                        return true;
                    }
                }
                Err(e) => warn!(service = %service, "URL filter target unavailable: {}", e),
            }
        }
        false
    }

    /// The first opinion of any instantiated plugin on navigating to `url`.
    pub fn should_allow_navigation(&self, url: &str) -> Option<bool> {
        self.live()
            .into_iter()
            .find_map(|(_, plugin)| plugin.should_allow_navigation(url))
    }

    /// Restart for a new page: pause and destroy live plugins, drop the cache,
    /// then bring eager services back up.
    pub fn init(&self) {
        self.on_pause(false);
        self.on_destroy();
        self.clear_instances();

        let eager: Vec<String> = {
            let services = self.read();
            services
                .order
                .iter()
                .filter(|name| services.slots.get(*name).is_some_and(|s| s.entry.eager))
                .cloned()
                .collect()
        };
        for service in eager {
            if let Err(e) = self.resolve(&service) {
                warn!(service = %service, "Eager plugin failed to start: {}", e);
            }
        }
    }

    /// Full teardown: destroy live plugins and drop the cache.
    pub fn shutdown(&self) {
        self.on_destroy();
        self.clear_instances();
        info!("Plugin registry shut down");
    }

    fn clear_instances(&self) {
        let slots: Vec<_> = self.read().slots.values().cloned().collect();
        for slot in slots {
            slot.lock().take();
        }
    }

    /// Registered service names in registration order.
    pub fn services(&self) -> Vec<String> {
        self.read().order.clone()
    }

    pub fn count(&self) -> usize {
        self.read().order.len()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.read().slots.contains_key(service)
    }

    pub fn is_instantiated(&self, service: &str) -> bool {
        self.slot(service).is_some_and(|slot| slot.instance().is_some())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("services", &self.services())
            .finish()
    }
}
