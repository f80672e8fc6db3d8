//! The handler contract.
//!
//! A [`Plugin`] implements one service. The registry creates it lazily through
//! a [`PluginFactory`], calls [`Plugin::initialize`] once, and from then on
//! shares it between invocations (possibly on several threads).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::args::PluginArgs;
use crate::callback::CallbackContext;
use crate::error::{PluginError, PluginOutcome};
use crate::queue::OutboundQueue;

/// Where an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// On the thread that received the invocation.
    #[default]
    Inline,
    /// On a worker thread; the invocation returns before the action finishes.
    Offloaded,
}

/// What a plugin receives when it is instantiated.
#[derive(Debug, Clone)]
pub struct PluginEnv {
    service: String,
    queue: OutboundQueue,
    settings: Value,
}

impl PluginEnv {
    pub fn new(service: impl Into<String>, queue: OutboundQueue, settings: Value) -> Self {
        Self {
            service: service.into(),
            queue,
            settings,
        }
    }

    /// The service name the plugin is registered under.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Queue for pushing raw script statements (events) to the runtime.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Per-service settings from the registration file.
    pub fn settings(&self) -> &Value {
        &self.settings
    }
}

/// A native capability addressable by service name.
pub trait Plugin: Send + Sync {
    /// Called once, before the plugin is cached and used.
    fn initialize(&mut self, _env: &PluginEnv) {}

    /// Run `action`. Returns `Ok(false)` when the action is not recognized.
    ///
    /// Results go through `ctx`; clone it to keep sending from another thread.
    fn execute(&self, action: &str, args: &PluginArgs, ctx: &CallbackContext) -> PluginOutcome;

    /// Where `action` should run.
    fn placement(&self, _action: &str) -> Placement {
        Placement::Inline
    }

    fn on_pause(&self, _multitasking: bool) {}

    fn on_resume(&self, _multitasking: bool) {}

    fn on_destroy(&self) {}

    /// The runtime navigated or reloaded; drop per-page state.
    fn on_reset(&self) {}

    /// A broadcast message from native code. The first `Some` reply wins.
    fn on_message(&self, _id: &str, _data: &Value) -> Option<Value> {
        None
    }

    /// Offered URLs matching this service's url filters. Return `true` to
    /// take over the load.
    fn on_override_url_loading(&self, _url: &str) -> bool {
        false
    }

    /// Opinion on whether the runtime may navigate to `url`.
    fn should_allow_navigation(&self, _url: &str) -> Option<bool> {
        None
    }
}

/// Creates plugin instances for the registry.
pub type PluginFactory = Arc<dyn Fn() -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

/// Wrap an infallible constructor as a [`PluginFactory`].
pub fn factory<P, F>(make: F) -> PluginFactory
where
    P: Plugin + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(move || Ok(Box::new(make()) as Box<dyn Plugin>))
}

/// An action implementation on plugin type `T`.
pub type ActionFn<T> = fn(&T, &PluginArgs, &CallbackContext) -> Result<(), PluginError>;

/// Maps action names to functions, replacing string-comparison chains.
///
/// Unknown actions fall through to `Ok(false)`, which the registry reports as
/// `InvalidAction`.
pub struct ActionTable<T> {
    actions: HashMap<&'static str, (Placement, ActionFn<T>)>,
}

impl<T> ActionTable<T> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action that runs on the invoking thread.
    pub fn inline(mut self, name: &'static str, action: ActionFn<T>) -> Self {
        self.actions.insert(name, (Placement::Inline, action));
        self
    }

    /// Register an action that runs on a worker thread.
    pub fn offloaded(mut self, name: &'static str, action: ActionFn<T>) -> Self {
        self.actions.insert(name, (Placement::Offloaded, action));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.actions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Placement of `name`; unknown actions run inline.
    pub fn placement(&self, name: &str) -> Placement {
        self.actions
            .get(name)
            .map(|(placement, _)| *placement)
            .unwrap_or_default()
    }

    pub fn dispatch(
        &self,
        target: &T,
        name: &str,
        args: &PluginArgs,
        ctx: &CallbackContext,
    ) -> PluginOutcome {
        match self.actions.get(name) {
            Some((_, action)) => action(target, args, ctx).map(|()| true),
            None => Ok(false),
        }
    }
}

impl<T> Default for ActionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
