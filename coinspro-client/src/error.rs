//! Client error types.

use coinspro_protocol::RemoteError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] coinspro_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("not connected")]
    NotConnected,

    #[error("session already started")]
    AlreadyStarted,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("session closed")]
    SessionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("sequence {0} is already pending")]
    DuplicateSequence(u64),

    #[error("{0} is not a subscription")]
    UnsupportedSubscription(String),

    #[error("remote error for {name}: {error}")]
    Remote { name: String, error: RemoteError },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::WebSocket(_) | ClientError::Timeout | ClientError::SessionClosed
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}
