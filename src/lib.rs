//! Concurrent broker relay
//!
//! Ingests broker messages into an ordered in-process history and dispatches
//! outbound payloads back to the broker through zero-capacity rendezvous
//! handoffs.

pub mod broker;
pub mod core;
pub mod infrastructure;
pub mod pipeline;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{ConnectionSite, MessageRecord, Origin};
pub use infrastructure::config::{Config, LoggingConfig, PipelineConfig, SiteConfig};
pub use pipeline::{Consumer, Producer, Supervisor};

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Unrecoverable failure (client construction, topic provisioning)
    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] infrastructure::config::ConfigError),

    /// A pipeline task was started twice
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub(crate) fn fatal(context: &str, err: impl std::fmt::Display) -> Self {
        RelayError::Fatal(format!("{}: {}", context, err))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
