//! Error types for stmt-runner.
//!
//! Defines the main error enum used throughout the crate. Statement failures
//! are carried as `Query`/`Timeout`/`Cancelled` inside the runner and turned
//! into failure outcomes; the other variants reach the caller.

use thiserror::Error;

/// Main error type for stmt-runner operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Database connection errors (host unreachable, auth failed, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, decode faults, engine faults, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// The execution deadline elapsed before the result was fully scanned.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The caller cancelled the execution.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors (invalid config file, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or unparseable run requests.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates a cancellation error with the given message.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an invalid request error with the given message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled(_) => "Cancelled",
            Self::Config(_) => "Configuration Error",
            Self::InvalidRequest(_) => "Invalid Request",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(msg)
            | Self::Query(msg)
            | Self::Timeout(msg)
            | Self::Cancelled(msg)
            | Self::Config(msg)
            | Self::InvalidRequest(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
