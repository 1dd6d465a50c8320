//! Request shield server.
//!
//! ```text
//!     Client Request
//!     ──▶ request id ─▶ trace ─▶ security headers ─▶ timeout
//!         ─▶ context ─▶ firewall ─▶ rate limit
//!         ─▶ session ─▶ replay / admin gate / CSRF ─▶ handler
//! ```
//!
//! Usage: `request-shield [config.toml]`. Without a file the built-in defaults
//! are used and hot reload is off.

use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use request_shield::config::loader::{apply_env_overrides, load_config};
use request_shield::config::watcher::ConfigWatcher;
use request_shield::observability::{logging, metrics};
use request_shield::{HttpServer, ShieldConfig, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => {
            let mut config = ShieldConfig::default();
            apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!("request-shield v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_enabled = config.rate_limit.enabled,
        firewall_enabled = config.firewall.enabled,
        security_log = %config.observability.security_log_path,
        "Configuration loaded"
    );
    if config.auth.enabled && config.auth.password_hash.is_empty() {
        tracing::warn!("No admin password hash configured, every login will be rejected");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for the lifetime of the server.
    let (_watcher, config_updates) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
