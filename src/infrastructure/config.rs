//! Configuration management for the relay
//!
//! Loads configuration from relay.toml at startup.
//! All tunables live here to avoid hardcoded constants in the pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Relay configuration
///
/// Loaded from relay.toml (or `CONFIG_PATH`) at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Broker target
    #[serde(default)]
    pub site: SiteConfig,

    /// Pipeline tunables
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker target settings
///
/// Aliases accept the key names of the legacy YAML site files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Comma-separated bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_group_id", alias = "gid")]
    pub group_id: String,

    /// Track consecutive read timeouts and flush the history on a streak
    #[serde(default, alias = "streamreset")]
    pub reset_enabled: bool,

    #[serde(default = "default_partitions")]
    pub partitions: i32,

    #[serde(default = "default_replication", alias = "replicationfactor")]
    pub replication_factor: i32,
}

/// Pipeline tunables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum number of cached buffers per pool
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Bounded wait for one broker read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// The history is flushed once the timeout streak exceeds this value
    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: u32,

    /// Wait bound for one flush poll during producer shutdown
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Number of flush polls before pending deliveries are abandoned
    #[serde(default = "default_flush_attempts")]
    pub flush_attempts: u32,

    /// Key of the metadata header attached to every dispatched message
    #[serde(default = "default_header_key")]
    pub header_key: String,

    /// How long shutdown waits for tasks before aborting them
    ///
    /// The producer's drain budget is added on top, see
    /// [`PipelineConfig::shutdown_budget`].
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Period of the status monitor in the binary
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

/// Logging output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON on the console instead of plain text
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files (console only when unset)
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            reset_enabled: false,
            partitions: default_partitions(),
            replication_factor: default_replication(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            read_timeout_ms: default_read_timeout_ms(),
            reset_threshold: default_reset_threshold(),
            flush_timeout_ms: default_flush_timeout_ms(),
            flush_attempts: default_flush_attempts(),
            header_key: default_header_key(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "relay".to_string()
}

fn default_group_id() -> String {
    "kafka-relay".to_string()
}

fn default_partitions() -> i32 {
    1
}

fn default_replication() -> i32 {
    1
}

fn default_pool_capacity() -> usize {
    100
}

fn default_read_timeout_ms() -> u64 {
    6_000
}

fn default_reset_threshold() -> u32 {
    2 // flush on the third consecutive timeout
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

fn default_flush_attempts() -> u32 {
    6
}

fn default_header_key() -> String {
    "kafka-relay".to_string()
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_monitor_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    #[inline]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Worst-case producer wind-down: every flush poll plus the wait for the
    /// delivery event stream
    pub fn drain_budget(&self) -> Duration {
        self.flush_timeout()
            .saturating_mul(self.flush_attempts.saturating_add(1))
    }

    /// Total time shutdown may take before tasks are aborted
    pub fn shutdown_budget(&self) -> Duration {
        self.shutdown_grace().saturating_add(self.drain_budget())
    }
}

impl Config {
    /// Load configuration from the file named by `CONFIG_PATH`, or relay.toml
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "relay.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.site.topic.is_empty() {
            return Err(ConfigError::Invalid("site.topic must not be empty".into()));
        }
        if self.site.brokers.is_empty() {
            return Err(ConfigError::Invalid("site.brokers must not be empty".into()));
        }
        if self.site.partitions < 1 || self.site.replication_factor < 1 {
            return Err(ConfigError::Invalid(
                "site.partitions and site.replication_factor must be positive".into(),
            ));
        }
        if self.pipeline.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pipeline.read_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error (invalid TOML)
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Parsed but semantically invalid
    #[error("Invalid config: {0}")]
    Invalid(String),
}
