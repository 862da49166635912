//! Error types for the voice session engine.

use thiserror::Error;

/// Result type alias for voice session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice session engine
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access denied by the OS/device layer
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Remote connect/send/receive failure; fatal to the session
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed base64 in an inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// Inbound PCM bytes do not match the declared layout
    #[error("audio format error: {0}")]
    Format(String),

    /// Unknown or malformed tool invocation
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Audio device failure other than permission
    #[error("audio error: {0}")]
    Audio(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connection(e.to_string())
    }
}
