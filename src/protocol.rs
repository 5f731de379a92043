//! Session protocol codec
//!
//! The bridge speaks small JSON text frames, each carrying a `type` tag.
//! Decoding is total: frames this client does not model (including anything
//! a newer collector starts sending) become [`ControlMessage::Unknown`] and
//! are ignored upstream instead of failing the session.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::Result;

/// Bridge protocol version advertised in the hello frame
pub const PROTOCOL_VERSION: u32 = 2;

/// Platform identifier advertised in the hello frame
pub const PLATFORM: &str = "rust";

/// Severity of a console event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        };
        write!(f, "{}", s)
    }
}

/// Control and application messages exchanged with the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Handshake: credential plus session metadata
    #[serde(rename_all = "camelCase")]
    Hello {
        secret: String,
        capabilities: Vec<String>,
        platform: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        protocol: u32,
    },
    /// Affirmative handshake acknowledgement
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Affirmative handshake acknowledgement (equivalent to auth_success)
    #[serde(rename_all = "camelCase")]
    HelloAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    /// Explicit handshake rejection
    AuthError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
    /// Console line shipped to the collector
    Console {
        message: String,
        level: LogLevel,
        timestamp: u64,
    },
    /// Application error report shipped to the collector
    Error { message: String, timestamp: u64 },
    /// Any frame kind this client does not model
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Both ack kinds the protocol accepts as handshake success
    pub fn is_handshake_ack(&self) -> bool {
        matches!(
            self,
            ControlMessage::AuthSuccess { .. } | ControlMessage::HelloAck { .. }
        )
    }

    /// Frames counted as liveness evidence
    pub fn is_liveness(&self) -> bool {
        matches!(self, ControlMessage::Ping | ControlMessage::Pong)
    }
}

/// Build the hello frame for a configuration
pub fn hello_frame(config: &BridgeConfig) -> ControlMessage {
    ControlMessage::Hello {
        secret: config.secret.clone(),
        capabilities: config.capabilities.clone(),
        platform: PLATFORM.to_string(),
        project_id: config.project_id.clone(),
        protocol: PROTOCOL_VERSION,
    }
}

/// Encode a message to a text frame
pub fn encode(message: &ControlMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a text frame; malformed input becomes `Unknown`
pub fn decode(frame: &str) -> ControlMessage {
    match serde_json::from_str(frame) {
        Ok(message) => message,
        Err(e) => {
            debug!("Undecodable frame treated as unknown: {}", e);
            ControlMessage::Unknown
        }
    }
}

/// Application event handed to `send`; encoded and written immediately,
/// never buffered
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// Console line with severity
    Console { message: String, level: LogLevel },
    /// Application error report
    Error { message: String },
}

impl OutboundEvent {
    pub fn console(message: impl Into<String>, level: LogLevel) -> Self {
        OutboundEvent::Console {
            message: message.into(),
            level,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            message: message.into(),
        }
    }

    /// Convert to a wire message, stamping the current time
    pub fn into_frame(self) -> ControlMessage {
        let timestamp = now_ms();
        match self {
            OutboundEvent::Console { message, level } => ControlMessage::Console {
                message,
                level,
                timestamp,
            },
            OutboundEvent::Error { message } => ControlMessage::Error { message, timestamp },
        }
    }
}

/// Current Unix time in milliseconds
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
