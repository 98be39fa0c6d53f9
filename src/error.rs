//! Briefwire error types

use thiserror::Error;

/// Briefwire error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Feed registry error
    #[error("Feed error: {0}")]
    Feed(String),

    /// Fetcher error
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// LLM gateway error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Agent pipeline error
    #[error("Agent error: {0}")]
    Agent(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notifier error
    #[error("Notifier error: {0}")]
    Notifier(String),

    /// Telemetry error
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Briefwire operations
pub type Result<T> = std::result::Result<T, Error>;
