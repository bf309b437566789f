//! Error types for Persistent Petitioner.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Email source/sink errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("IMAP fetch failed: {0}")]
    Fetch(String),

    #[error("Failed to send mail to {to}: {reason}")]
    SendFailed { to: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Email channel is not configured: {0}")]
    NotConfigured(String),
}

/// Browser automation errors.
///
/// Attempt-level conditions (timeout, missing submit control) are NOT errors;
/// they are [`crate::signer::SignAttempt`] variants. This type covers failures
/// to run the capability at all.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser session failed: {0}")]
    Session(String),

    #[error("Signer timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Pipeline-level errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Message fetch failed: {0}")]
    SourceFetch(String),

    #[error("Record store failure: {0}")]
    Store(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
