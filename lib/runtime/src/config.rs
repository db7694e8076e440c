//! Centralized configuration for the operion processes.
//!
//! Loaded via the `config` crate from environment variables with `__` as
//! the nesting separator (e.g. `DATABASE_URL`, `EVENT_BUS_TYPE`).

use serde::Deserialize;
use ulid::Ulid;

/// Which bus backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventBusType {
    /// NATS JetStream (deployments).
    #[default]
    Nats,
    /// In-process channels (local development, tests).
    Memory,
}

/// Log verbosity for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the tracing filter directive for this level.
    #[must_use]
    pub const fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_plugins_path() -> String {
    "./plugins".to_string()
}

fn default_webhook_port() -> u16 {
    8085
}

/// Configuration shared by the manager and activator processes.
#[derive(Debug, Clone, Deserialize)]
pub struct OperionConfig {
    /// Persistence backend connection string. `file://` URLs select the
    /// filesystem backend; anything else is treated as a Postgres URL.
    pub database_url: String,

    /// Bus backend selection.
    #[serde(default)]
    pub event_bus_type: EventBusType,

    /// NATS server URL (used when `event_bus_type` is `nats`).
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Directory holding provider factory plugins.
    #[serde(default = "default_plugins_path")]
    pub plugins_path: String,

    /// Comma-separated allowlist of provider IDs to activate; empty means
    /// all registered providers.
    #[serde(default)]
    pub providers: Option<String>,

    /// TCP port bound by the webhook provider, if one is registered.
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Manager instance ID; auto-generated when absent.
    #[serde(default)]
    pub manager_id: Option<String>,

    /// Activator instance ID; auto-generated when absent.
    #[serde(default)]
    pub activator_id: Option<String>,
}

impl OperionConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the provider allowlist as a list of IDs.
    #[must_use]
    pub fn provider_allowlist(&self) -> Vec<String> {
        self.providers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Returns the filesystem root when the database URL selects the file
    /// backend.
    #[must_use]
    pub fn file_backend_path(&self) -> Option<&str> {
        self.database_url.strip_prefix("file://")
    }

    /// Returns the manager instance ID, generating one if unset.
    #[must_use]
    pub fn manager_instance_id(&self) -> String {
        self.manager_id
            .clone()
            .unwrap_or_else(|| generate_instance_id("manager"))
    }

    /// Returns the activator instance ID, generating one if unset.
    #[must_use]
    pub fn activator_instance_id(&self) -> String {
        self.activator_id
            .clone()
            .unwrap_or_else(|| generate_instance_id("activator"))
    }
}

/// Generates `{role}-{first 8 id chars}`.
fn generate_instance_id(role: &str) -> String {
    let id = Ulid::new().to_string().to_lowercase();
    format!("{role}-{}", &id[..8])
}
