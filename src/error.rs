//! Error types for the usage tracking engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Input validation failed before any store access
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A metric store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Validation errors
///
/// Raised by `push_metric` and `get_metrics` before any store command is
/// issued. A validation failure never leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The event carried no recognized scope
    #[error("Metric event must include at least one scope")]
    MissingScope,

    /// A field required by the action is missing
    #[error("Metric event must include the {0} field")]
    MissingField(&'static str),

    /// Time range start is after its end
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start timestamp in milliseconds
        start: i64,
        /// End timestamp in milliseconds
        end: i64,
    },
}

/// Metric store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection to the store backend failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single command was rejected by the store
    #[error("Command failed: {0}")]
    Command(String),

    /// The store replied with an unexpected value shape
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
