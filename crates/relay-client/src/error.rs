//! Error types for relay-client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a relay.
#[derive(Debug, Error)]
pub enum Error {
    /// Event model or signing failure.
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr_core::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol or IO failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Relay URL could not be parsed.
    #[error("invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Relay URL is not ws:// or wss://.
    #[error("unsupported relay URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Inbound frame is not a well-formed relay message.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport session failed or closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An attempt exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The owning cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    /// `connect` was called while a connection loop is running.
    #[error("already connected")]
    AlreadyConnected,

    /// A background task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Required environment variable is missing.
    #[error("missing env var: {0}")]
    MissingEnv(&'static str),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
