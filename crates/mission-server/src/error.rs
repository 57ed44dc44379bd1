//! Error types for the mission server binary.
//!
//! [`ServerError`] wraps every failure mode of startup so `main` can
//! propagate with `?`. Once the loop is running nothing fails: mission
//! failures are handled inside the state machine.

use std::path::PathBuf;

/// Top-level error for the mission server binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: mission_core::config::ConfigError,
    },

    /// The startup mission descriptor could not be read.
    #[error("cannot read mission descriptor {path}: {source}")]
    DescriptorRead {
        /// File that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The startup mission descriptor is not a valid mission.
    #[error("invalid mission descriptor {path}: {source}")]
    DescriptorParse {
        /// File that was being parsed.
        path: PathBuf,
        /// The underlying parse error.
        source: serde_yml::Error,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
