//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/fusabi-bridge/config.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.
//!
//! The `[[plugins]]` array is the declarative registration list: entries are
//! registered in file order, and a later entry for the same service replaces
//! an earlier one.

use anyhow::{Context, Result};
use fusabi_bridge::{BridgeModeKind, QueueOptions, DEFAULT_COMBINED_RESPONSE_CUTOFF};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Host and queue settings
    #[serde(default)]
    pub host: HostConfig,
    /// Handler registrations, in registration order
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Host and queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Initial bridge mode (no_op, polling, online_events, eval)
    /// Default: "eval"
    pub bridge_mode: String,
    /// Inline actions slower than this are logged
    /// Default: 16
    pub slow_exec_warning_ms: u64,
    /// Upper bound, in encoded characters, for one combined drain
    /// Default: 16 MiB
    pub combined_response_cutoff: usize,
    /// Queue length that triggers a warning; unset disables the check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_high_water_mark: Option<usize>,
    /// Return pending messages directly from exec calls
    /// Default: true
    pub exec_chaining: bool,
}

/// One handler registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    /// Service name scripts address the handler by
    pub service: String,
    /// Handler type reference, resolved through the handler catalog
    pub handler: String,
    /// Instantiate at startup instead of on first use
    #[serde(default)]
    pub eager: bool,
    /// URL prefixes routed to this service for interception
    #[serde(default)]
    pub url_filters: Vec<String>,
    /// Handler-specific settings as arbitrary TOML value
    #[serde(default = "default_settings")]
    pub settings: toml::Value,
}

fn default_settings() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bridge_mode: BridgeModeKind::Eval.as_str().to_string(),
            slow_exec_warning_ms: 16,
            combined_response_cutoff: DEFAULT_COMBINED_RESPONSE_CUTOFF,
            queue_high_water_mark: None,
            exec_chaining: true,
        }
    }
}

impl PluginConfig {
    pub fn new(service: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handler: handler.into(),
            eager: false,
            url_filters: Vec::new(),
            settings: default_settings(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/fusabi-bridge/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "fusabi-bridge")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    pub fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# Fusabi Bridge Host Configuration

[host]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
log_level = "info"

# Initial bridge mode: no_op, polling, online_events, eval
# The script side may switch modes at runtime.
bridge_mode = "eval"

# Inline actions slower than this many milliseconds are logged
slow_exec_warning_ms = 16

# Upper bound, in encoded characters, for one combined drain
combined_response_cutoff = 16777216

# Warn when the outbound queue grows past this many messages
# queue_high_water_mark = 10000

# Return pending messages directly from exec calls
exec_chaining = true

# Handler registrations, applied in order.
# - service: name scripts use to address the handler
# - handler: handler type reference (see the handler catalog)
# - eager: instantiate at startup instead of on first use
# - url_filters: URL prefixes offered to this handler for interception
# - settings: handler-specific settings

[[plugins]]
service = "Echo"
handler = "echo"
eager = false

[plugins.settings]
# prefix = "echo: "
# delay_ms = 0
"#
        .to_string()
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are valid and within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        self.bridge_mode()?;

        if self.host.combined_response_cutoff == 0 {
            anyhow::bail!("host.combined_response_cutoff must be greater than 0");
        }

        for (index, plugin) in self.plugins.iter().enumerate() {
            if plugin.service.trim().is_empty() {
                anyhow::bail!("plugins[{}]: service must not be empty", index);
            }
            if plugin.handler.trim().is_empty() {
                anyhow::bail!("Plugin '{}': handler must not be empty", plugin.service);
            }
        }

        Ok(())
    }

    /// The configured initial bridge mode
    pub fn bridge_mode(&self) -> Result<BridgeModeKind> {
        BridgeModeKind::parse(&self.host.bridge_mode).with_context(|| {
            let names: Vec<_> = BridgeModeKind::ALL.iter().map(|m| m.as_str()).collect();
            format!(
                "Invalid bridge_mode: {}. Must be one of: {}",
                self.host.bridge_mode,
                names.join(", ")
            )
        })
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            combined_response_cutoff: self.host.combined_response_cutoff,
            high_water_mark: self.host.queue_high_water_mark,
        }
    }

    pub fn slow_exec_warning(&self) -> Duration {
        Duration::from_millis(self.host.slow_exec_warning_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.host.bridge_mode, "eval");
        assert_eq!(config.host.slow_exec_warning_ms, 16);
        assert!(config.host.exec_chaining);
        assert!(config.host.queue_high_water_mark.is_none());
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_default_content_parses() {
        let config: Config = toml::from_str(&Config::default_config_content()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].service, "Echo");
        assert_eq!(config.host.combined_response_cutoff, DEFAULT_COMBINED_RESPONSE_CUTOFF);
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[host]
log_level = "debug"
bridge_mode = "polling"
queue_high_water_mark = 500

[[plugins]]
service = "Echo"
handler = "echo"
eager = true
url_filters = ["echo://"]

[plugins.settings]
prefix = ">"

[[plugins]]
service = "Other"
handler = "echo"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.host.log_level, "debug");
        assert_eq!(config.bridge_mode().unwrap(), BridgeModeKind::Polling);
        assert_eq!(config.queue_options().high_water_mark, Some(500));
        assert_eq!(config.plugins.len(), 2);

        let echo = &config.plugins[0];
        assert!(echo.eager);
        assert_eq!(echo.url_filters, vec!["echo://"]);
        assert_eq!(echo.settings["prefix"].as_str(), Some(">"));

        let other = &config.plugins[1];
        assert!(!other.eager);
        assert!(other.url_filters.is_empty());
    }

    #[test]
    fn test_load_empty_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_create_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::create_default_file(&path).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.plugins[0].handler, "echo");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.host.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_bridge_mode() {
        let mut config = Config::default();
        config.host.bridge_mode = "carrier_pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_cutoff() {
        let mut config = Config::default();
        config.host.combined_response_cutoff = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_service() {
        let mut config = Config::default();
        config.plugins.push(PluginConfig::new(" ", "echo"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_services_are_allowed() {
        let mut config = Config::default();
        config.plugins.push(PluginConfig::new("Echo", "echo"));
        config.plugins.push(PluginConfig::new("Echo", "echo"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config_roundtrip() {
        let mut config = Config::default();
        config.host.log_level = "debug".to_string();
        config.host.queue_high_water_mark = Some(10);
        let mut plugin = PluginConfig::new("Echo", "echo");
        plugin.url_filters.push("echo://".to_string());
        config.plugins.push(plugin);

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
    }
}
