use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::{proximity::validate_radius, EngineConfig, IndexKind, MatchError};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    pub endpoint: String,
    pub api_key: String,
    pub project_id: String,
    pub database_id: String,
    #[serde(default = "default_help_requests_collection")]
    pub help_requests_collection: String,
    #[serde(default = "default_volunteers_collection")]
    pub volunteers_collection: String,
    pub timeout_secs: Option<u64>,
    pub page_limit: Option<u32>,
}

fn default_help_requests_collection() -> String { "help_requests".to_string() }
fn default_volunteers_collection() -> String { "volunteers".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default = "default_radius_meters")]
    pub radius_meters: f64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    /// Bound on each ledger store load or save
    #[serde(default = "default_ledger_timeout_secs")]
    pub ledger_timeout_secs: u64,
    #[serde(default)]
    pub index: IndexKind,
    #[serde(default)]
    pub prune_retired: bool,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            radius_meters: default_radius_meters(),
            poll_interval_secs: default_poll_interval_secs(),
            feed_timeout_secs: default_feed_timeout_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            ledger_timeout_secs: default_ledger_timeout_secs(),
            index: IndexKind::default(),
            prune_retired: false,
        }
    }
}

fn default_radius_meters() -> f64 { 80_467.0 }
fn default_poll_interval_secs() -> u64 { 10 }
fn default_feed_timeout_secs() -> u64 { 5 }
fn default_dispatch_timeout_secs() -> u64 { 10 }
fn default_ledger_timeout_secs() -> u64 { 2 }

impl MatchingSettings {
    /// Reject a radius or interval the engine would refuse at start
    pub fn validate(&self) -> Result<(), MatchError> {
        validate_radius(self.radius_meters)?;
        if self.poll_interval_secs == 0 {
            return Err(MatchError::InvalidInterval);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            radius_meters: self.radius_meters,
            feed_timeout: Duration::from_secs(self.feed_timeout_secs),
            dispatch_timeout: Duration::from_secs(self.dispatch_timeout_secs),
            ledger_timeout: Duration::from_secs(self.ledger_timeout_secs),
            prune_retired: self.prune_retired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchSettings {
    #[serde(default)]
    pub kind: SinkKind,
    pub webhook_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    pub redis_url: Option<String>,
    #[serde(default = "default_ledger_key")]
    pub key: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key: default_ledger_key(),
        }
    }
}

fn default_ledger_key() -> String { "relief:ledger".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

fn environment() -> Environment {
    // e.g., RELIEF__MATCHING__RADIUS_METERS -> matching.radius_meters
    Environment::with_prefix("RELIEF")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with RELIEF__)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }
}
