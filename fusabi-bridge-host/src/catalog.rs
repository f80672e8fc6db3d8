//! Handler catalog: resolves handler type references from the configuration
//! to factories, and populates a registry from the `[[plugins]]` list.

use anyhow::{Context, Result};
use fusabi_bridge::{PluginEntry, PluginFactory, PluginRegistry};
use std::collections::HashMap;
use tracing::info;

use crate::config::PluginConfig;

/// Known handler types, by reference name.
#[derive(Default)]
pub struct HandlerCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl HandlerCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with the handlers compiled into this host.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(handler_echo::HANDLER_REF, handler_echo::echo_factory());
        catalog
    }

    /// Add (or replace) a handler type.
    pub fn add(&mut self, handler: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(handler.into(), factory);
    }

    pub fn get(&self, handler: &str) -> Option<PluginFactory> {
        self.factories.get(handler).cloned()
    }

    /// Handler reference names, sorted.
    pub fn handlers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Turn one configured registration into a registry entry.
    pub fn entry(&self, plugin: &PluginConfig) -> Result<PluginEntry> {
        let factory = self.get(&plugin.handler).with_context(|| {
            format!(
                "Plugin '{}': unknown handler '{}'. Known handlers: {}",
                plugin.service,
                plugin.handler,
                self.handlers().join(", ")
            )
        })?;
        let settings = serde_json::to_value(&plugin.settings)
            .with_context(|| format!("Plugin '{}': settings are not representable", plugin.service))?;

        let mut entry = PluginEntry::new(plugin.service.clone(), factory)
            .eager(plugin.eager)
            .with_settings(settings);
        for prefix in &plugin.url_filters {
            entry = entry.with_url_filter(prefix.clone());
        }
        Ok(entry)
    }

    /// Register every configured plugin, in order.
    ///
    /// All handler references are checked before anything is registered.
    pub fn populate(&self, registry: &PluginRegistry, plugins: &[PluginConfig]) -> Result<usize> {
        let entries = plugins
            .iter()
            .map(|plugin| self.entry(plugin))
            .collect::<Result<Vec<_>>>()?;

        let count = entries.len();
        for entry in entries {
            registry.register_entry(entry);
        }
        info!("Registered {} plugin(s): {:?}", count, registry.services());
        Ok(count)
    }
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("handlers", &self.handlers())
            .finish()
    }
}
