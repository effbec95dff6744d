//! Error types for voicebar

use thiserror::Error;

/// Result type alias for voicebar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a spoken turn
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or error-bearing event on the chat stream
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing connection provider or credentials
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure or non-success response
    #[error("network error: {0}")]
    Network(String),

    /// Append rejected by the playback engine
    #[error("playback engine error: {0}")]
    PlaybackEngine(String),

    /// Audio device or decode error
    #[error("audio error: {0}")]
    Audio(String),

    /// Turn aborted through its cancellation token
    #[error("turn cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Pipeline stage panicked or was aborted
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether this error belongs to the network family (transport or status)
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_))
    }

    /// Whether this error is a configuration problem raised before any call
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Toml(_))
    }
}
