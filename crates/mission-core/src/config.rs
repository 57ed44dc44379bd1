//! Configuration loading and typed config structures for the mission server.
//!
//! The configuration lives in `mission-server.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure and a loader that
//! reads the file. Every section and field has a default, so an empty file
//! (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

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
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// State machine settings.
    #[serde(default)]
    pub machine: MachineConfig,

    /// Tick and inbound queue settings for the async driver.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Transport connection settings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mission injected at startup.
    #[serde(default)]
    pub mission: MissionConfig,
}

impl ServerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `NATS_URL` overrides `infrastructure.nats_url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise use defaults (still
    /// applying environment overrides).
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file) when the file exists.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            let mut config = Self::default();
            config.infrastructure.apply_env_overrides();
            Ok(config)
        }
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}

/// State machine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MachineConfig {
    /// Prefix of the status line broadcast on every transition
    /// (`"<prefix>: <PHASE>"`).
    #[serde(default = "default_status_prefix")]
    pub status_prefix: String,

    /// Most transitions applied within a single tick. With the default of
    /// one, a completion signaled on entry waits for the next tick. Zero is
    /// treated as one.
    #[serde(default = "default_max_chained_transitions")]
    pub max_chained_transitions: u32,

    /// Transition records kept for status reporting.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            status_prefix: default_status_prefix(),
            max_chained_transitions: default_max_chained_transitions(),
            history_capacity: default_history_capacity(),
        }
    }
}

/// Async driver settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerConfig {
    /// Real-time milliseconds per host step (one PRE and one POST tick).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Inbound messages buffered between the transport and the machine.
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// Inbound messages delivered between two steps. Once reached, the
    /// loop waits for the next step before reading more.
    #[serde(default = "default_max_messages_per_step")]
    pub max_messages_per_step: u32,
}

impl RunnerConfig {
    /// The tick interval as a [`Duration`]. Never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Messages allowed per step. Never zero.
    pub fn message_budget(&self) -> u32 {
        self.max_messages_per_step.max(1)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
            max_messages_per_step: default_max_messages_per_step(),
        }
    }
}

/// Transport connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// NATS messaging URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Prefix of every subject the server publishes or subscribes on.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl InfrastructureConfig {
    /// Override connection settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("NATS_URL") {
            self.nats_url = val;
        }
    }
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Mission injected at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MissionConfig {
    /// YAML or JSON mission descriptor handed to the machine before its
    /// first tick.
    #[serde(default)]
    pub descriptor_path: Option<PathBuf>,
}

fn default_status_prefix() -> String {
    String::from("SERVER")
}

const fn default_max_chained_transitions() -> u32 {
    1
}

const fn default_history_capacity() -> usize {
    64
}

const fn default_tick_interval_ms() -> u64 {
    50
}

const fn default_inbound_queue_capacity() -> usize {
    1024
}

const fn default_max_messages_per_step() -> u32 {
    64
}

fn default_nats_url() -> String {
    String::from("nats://localhost:4222")
}

fn default_subject_prefix() -> String {
    String::from("mission")
}

fn default_log_level() -> String {
    String::from("info")
}
