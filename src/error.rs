//! Error types for the NSQ exporter

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the NSQ exporter
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry rejected an operation
    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// nsqlookupd / nsqd could not be reached
    #[error("Cluster connection error: {0}")]
    ObserverConnection(#[source] reqwest::Error),

    /// nsqlookupd / nsqd answered with something we cannot use
    #[error("Unexpected cluster response from {endpoint}: {reason}")]
    ObserverResponse { endpoint: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
