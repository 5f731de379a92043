//! Bridge client configuration
//!
//! Immutable after construction; the client clones it into the connection
//! loop and never writes it back.

use std::time::Duration;

/// Time between liveness pings while connected
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 15_000;
/// Max wait for a liveness reply before declaring the connection dead
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;
/// First reconnect delay after a failed attempt
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
/// Ceiling for the doubling reconnect delay
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
/// Bound on opening the transport
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Bound on waiting for the handshake acknowledgement
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Bridge client configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Collector WebSocket URL
    pub url: String,
    /// Shared secret presented in the hello frame
    pub secret: String,
    /// Project identifier advertised to the collector, if any
    pub project_id: Option<String>,
    /// Event kinds this client emits
    pub capabilities: Vec<String>,
    /// Milliseconds between liveness pings
    pub heartbeat_interval_ms: u64,
    /// Milliseconds to wait for a liveness reply
    pub heartbeat_timeout_ms: u64,
    /// Initial reconnect delay in milliseconds
    pub backoff_initial_ms: u64,
    /// Maximum reconnect delay in milliseconds
    pub backoff_max_ms: u64,
    /// Milliseconds allowed for the transport to open
    pub connect_timeout_ms: u64,
    /// Milliseconds allowed for the handshake acknowledgement
    pub handshake_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9877".to_string(),
            secret: "dev-secret".to_string(),
            project_id: None,
            capabilities: vec!["console".to_string(), "error".to_string()],
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    /// Create a config for the given collector URL and secret
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
            ..Self::default()
        }
    }

    /// Set the project identifier advertised in the hello frame
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the heartbeat cadence and reply bound
    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    /// Set the reconnect backoff bounds
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.backoff_initial_ms = initial_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Set the connect and handshake bounds
    pub fn with_timeouts(mut self, connect_ms: u64, handshake_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.handshake_timeout_ms = handshake_ms;
        self
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("url must not be empty".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be greater than zero".to_string());
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err("heartbeat_timeout_ms must be greater than zero".to_string());
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            return Err(format!(
                "backoff_initial_ms ({}) must not exceed backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than zero".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
