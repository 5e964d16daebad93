//! Territory history server binary.
//!
//! Wires the history engine to a storage backend and serves the HTTP API.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `territory-config.yaml` (or `TERRITORY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Select the backend: `PostgreSQL` when a database URL is configured,
//!    the in-memory store otherwise
//! 4. Run pending migrations (`PostgreSQL` only, unless disabled)
//! 5. Serve the API until `Ctrl-C` or `SIGTERM`

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use territory_api::{AppState, ServerConfig};
use territory_db::PostgresPool;
use territory_history::MemoryStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig, ServiceConfig};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "territory-config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config_file = ?config_path,
        "territory-server starting"
    );

    let server = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };

    // 3-5. Select the backend and serve.
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = PostgresPool::connect(&config.database.pool_config(url))
                .await
                .context("failed to connect to PostgreSQL")?;
            if config.database.run_migrations {
                pool.run_migrations()
                    .await
                    .context("failed to run database migrations")?;
            }
            info!(backend = "postgres", "Storage backend ready");

            let state = Arc::new(AppState::new(pool.store()));
            let served = territory_api::start_server(&server, state).await;
            pool.close().await;
            served.context("HTTP server failed")?;
        }
        None => {
            warn!("No database URL configured, history is kept in memory only");
            info!(backend = "memory", "Storage backend ready");

            let state = Arc::new(AppState::new(MemoryStore::new()));
            territory_api::start_server(&server, state)
                .await
                .context("HTTP server failed")?;
        }
    }

    info!("territory-server shutdown complete");
    Ok(())
}

/// Load the configuration file if present, otherwise defaults.
///
/// Returns the path that was read, if any.
fn load_config() -> anyhow::Result<(ServiceConfig, Option<PathBuf>)> {
    let path = std::env::var_os("TERRITORY_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        let config = ServiceConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok((config, Some(path)))
    } else {
        Ok((ServiceConfig::from_env()?, None))
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
