//! Trestle - resilient bridge client for shipping application events
//!
//! Keeps a single logical session to an event collector alive across an
//! unreliable WebSocket: authenticates on connect, detects silent failures
//! with application-level heartbeats, and recovers with bounded exponential
//! backoff. Events are delivered best-effort while a session is live; there
//! is never more than one active session per client.
//!
//! ## Components
//!
//! - **Client**: connection manager driving the attempt lifecycle and the
//!   public start/stop/send contract
//! - **Heartbeat**: ping cadence plus reply deadline for dead-session detection
//! - **Backoff**: deterministic doubling reconnect delay, reset on success
//! - **Protocol**: the JSON control vocabulary (hello, acks, ping/pong, events)
//! - **Transport**: WebSocket adapter behind a trait seam for test doubles
//!
//! ## Example
//!
//! ```no_run
//! use trestle::{BridgeClient, BridgeConfig, LogLevel};
//!
//! # async fn run() -> trestle::Result<()> {
//! let config = BridgeConfig::new("ws://localhost:9877", "dev-secret");
//! let client = BridgeClient::new(config)?;
//! client.start().await?;
//!
//! client.wait_connected().await;
//! client.send_console("app booted", LogLevel::Info).await?;
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod transport;

pub use client::{BridgeClient, SessionState};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use protocol::{ControlMessage, LogLevel, OutboundEvent};
pub use transport::{FrameSink, FrameStream, Transport, WsTransport};
