//! Configuration loading for the territory history server.
//!
//! The configuration lives in `territory-config.yaml` (or the file named by
//! `TERRITORY_CONFIG`). Every section and field has a default, so a missing
//! file yields a working server on the in-memory store.
//!
//! Environment variables override the file:
//! - `DATABASE_URL` sets `database.url`
//! - `TERRITORY_HOST` sets `server.host`
//! - `TERRITORY_PORT` sets `server.port`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use territory_db::PostgresConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override holds an unusable value.
    #[error("invalid value for {name}: {value}")]
    Env {
        /// The variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerSection,

    /// `PostgreSQL` settings. Without a URL the in-memory store is used.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Env`] if an override cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Env`] if an override cannot be parsed.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if an override cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if `TERRITORY_PORT` is not a port
    /// number.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(host) = lookup("TERRITORY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TERRITORY_PORT") {
            self.server.port =
                port.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::Env {
                        name: "TERRITORY_PORT",
                        value: format!("{port} ({e})"),
                    })?;
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `PostgreSQL` settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. `None` selects the in-memory store.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds before an idle connection is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Whether pending migrations run at startup.
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Pool configuration for a URL.
    pub fn pool_config(&self, url: &str) -> PostgresConfig {
        PostgresConfig::new(url)
            .with_max_connections(self.max_connections)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_run_migrations() -> bool {
    true
}

fn default_log_level() -> String {
    String::from("info")
}
