//! Error types for the bridge client

use thiserror::Error;

/// Bridge client error
///
/// Every variant except [`BridgeError::NotConnected`] and
/// [`BridgeError::Config`] is handled inside the connection loop: it ends the
/// current attempt and feeds the reconnect backoff. Nothing here is fatal to
/// the client lifecycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport could not open a connection
    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    /// Server explicitly refused the handshake
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// No handshake acknowledgement within the configured bound
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// No liveness reply within the configured bound
    #[error("Heartbeat timed out")]
    HeartbeatTimeout,

    /// Peer or network closed the stream
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// `send` was called while no session is live; the event was dropped
    #[error("Not connected")]
    NotConnected,

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON encoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
