//! Error types for EchoNet

use thiserror::Error;

/// Result type alias for EchoNet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in EchoNet
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid listen mode
    #[error("invalid listen_mode: {0} (must be 'inactive', 'trigger' or 'active')")]
    InvalidMode(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transcription error
    #[error("transcription error: {0}")]
    Transcribe(String),

    /// Voice activity detection error
    #[error("vad error: {0}")]
    Vad(String),

    /// Target fan-out error
    #[error("forward error: {0}")]
    Forward(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
