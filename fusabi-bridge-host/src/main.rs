//! # fusabi-bridge-host
//!
//! Hosts the plugin bridge for a script runtime attached over stdio.
//!
//! The host is responsible for:
//! - Registering handlers from the `[[plugins]]` list in the configuration
//! - Running script invocations through the bridge
//! - Delivering results in the bridge mode the runtime selected
//! - Forwarding lifecycle events to instantiated handlers
//!
//! ## Transport
//!
//! ```text
//!   script runtime                         fusabi-bridge-host
//!  ┌──────────────┐   stdin (JSON lines)  ┌────────────────────────────┐
//!  │              │ ────────────────────▶ │ Coordinator ─▶ Bridge      │
//!  │              │                       │      ▲           │         │
//!  │              │   stdout (JSON lines) │      │      Dispatcher     │
//!  │              │ ◀──────────────────── │  signals    ┌────┴─────┐   │
//!  └──────────────┘                       │      │      │ handlers │   │
//!                                         │  OutboundQueue ◀───────┘   │
//!                                         └────────────────────────────┘
//! ```
//!
//! Logs go to stderr; stdout carries frames only.
//!
//! ## Configuration
//!
//! The host reads `$XDG_CONFIG_HOME/fusabi-bridge/config.toml`, or the file
//! named by `FUSABI_BRIDGE_CONFIG`.
//!
//! ## Running
//!
//! ```bash
//! # Start the host
//! cargo run --bin fusabi-bridge-host
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin fusabi-bridge-host
//! ```

use anyhow::Result;
use tokio::io::BufReader;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fusabi_bridge_host::catalog::HandlerCatalog;
use fusabi_bridge_host::config::Config;
use fusabi_bridge_host::coordinator::{Coordinator, LineSink};

const CONFIG_ENV: &str = "FUSABI_BRIDGE_CONFIG";

fn load_config() -> Result<Config> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging needs the configured level, so load first and report afterwards
    let loaded = load_config();
    let config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };
    init_logging(&config.host.log_level);

    info!("Starting fusabi-bridge-host v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration"),
        Err(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    let catalog = HandlerCatalog::builtin();
    let (coordinator, signals) = Coordinator::new(&config, &catalog, Handle::current())?;
    info!(
        "Bridge ready in {} mode with {} service(s)",
        config.host.bridge_mode,
        coordinator.registry().count()
    );

    let input = BufReader::new(tokio::io::stdin());
    let mut sink = LineSink::new(tokio::io::stdout());

    tokio::select! {
        result = coordinator.run(input, signals, &mut sink) => {
            let reason = result?;
            info!("Frame loop stopped: {:?}", reason);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    info!("Shutting down...");
    coordinator.shutdown();
    info!("Host stopped");
    Ok(())
}
