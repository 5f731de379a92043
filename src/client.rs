//! Bridge client - managed session to the event collector
//!
//! Owns the per-attempt lifecycle (connect → authenticate → connected →
//! detect failure → tear down) on a single background task, composes the
//! heartbeat monitor and reconnect backoff, and exposes the public contract:
//! start, stop, send, and session-state observation.
//!
//! All session-state transitions happen on the connection task; the public
//! methods only read state or hand work to it, so there is exactly one
//! writer and no transition races.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor};
use crate::protocol::{self, ControlMessage, LogLevel, OutboundEvent};
use crate::transport::{FrameSink, FrameStream, Transport, WsTransport};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        };
        write!(f, "{}", s)
    }
}

/// Sender half of the current attempt's outbound queue; `None` whenever no
/// session is live
type OutboundSlot = Arc<RwLock<Option<mpsc::UnboundedSender<OutboundEvent>>>>;

/// Resilient client for the bridge connection
///
/// Dropping the client without calling [`BridgeClient::stop`] also ends the
/// connection loop: the loop treats a closed shutdown channel as a stop.
pub struct BridgeClient {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    /// Session state, written only by the connection loop
    state_tx: Arc<watch::Sender<SessionState>>,
    /// Outbound queue for the current attempt
    outbound: OutboundSlot,
    /// Informational frames republished to subscribers
    events_tx: broadcast::Sender<ControlMessage>,
    /// Shutdown fan-out to the connection loop
    shutdown_tx: broadcast::Sender<()>,
    /// Running connection loop, if any
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Create a client using the WebSocket transport
    pub fn new(config: BridgeConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    /// Create a client over a caller-supplied transport
    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate().map_err(BridgeError::Config)?;

        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, _) = broadcast::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            transport,
            state_tx: Arc::new(state_tx),
            outbound: Arc::new(RwLock::new(None)),
            events_tx,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Launch the connection loop; idempotent while already running
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                warn!("Bridge client already running");
                return Ok(());
            }
        }

        info!(url = %self.config.url, "Starting bridge client");

        // Subscribe before spawning so a stop() issued right after start()
        // cannot slip past the loop
        let shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(connection_loop(
            self.config.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.outbound),
            self.events_tx.clone(),
            shutdown_rx,
        )));

        Ok(())
    }

    /// Stop the connection loop and release the transport; idempotent
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let handle = match task.take() {
            Some(handle) => handle,
            None => {
                debug!("Bridge client not running");
                return;
            }
        };

        info!("Stopping bridge client");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            warn!(error = %e, "Connection loop ended abnormally");
        }

        // The loop resets these on every exit path; repeating here covers an
        // aborted loop as well
        *self.outbound.write().await = None;
        self.state_tx.send_replace(SessionState::Disconnected);
    }

    /// Queue an event for delivery on the live session
    ///
    /// Fails with [`BridgeError::NotConnected`] while no session is live;
    /// the event is dropped, not buffered.
    pub async fn send(&self, event: OutboundEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let outbound = self.outbound.read().await;
        match outbound.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| BridgeError::NotConnected),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Ship a console line
    pub async fn send_console(&self, message: impl Into<String>, level: LogLevel) -> Result<()> {
        self.send(OutboundEvent::console(message, level)).await
    }

    /// Ship an application error report
    pub async fn send_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(OutboundEvent::error(message)).await
    }

    /// Subscribe to informational frames received from the collector
    pub fn events(&self) -> broadcast::Receiver<ControlMessage> {
        self.events_tx.subscribe()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Whether a session is currently live
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Watch session-state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Resolve once a session is live
    pub async fn wait_connected(&self) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so this cannot error here
        let _ = rx.wait_for(|s| *s == SessionState::Connected).await;
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

/// How one connection attempt ended
enum AttemptEnd {
    /// stop() observed (or the client was dropped); the loop must exit
    Shutdown,
    /// Attempt failed; reconnect after backoff
    Failed(BridgeError),
}

/// Drives connection attempts until shutdown
async fn connection_loop(
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    outbound: OutboundSlot,
    events_tx: broadcast::Sender<ControlMessage>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = Backoff::new(config.backoff_initial(), config.backoff_max());

    loop {
        let end = run_attempt(
            &config,
            transport.as_ref(),
            &state,
            &outbound,
            &events_tx,
            &mut shutdown_rx,
            &mut backoff,
        )
        .await;

        match end {
            AttemptEnd::Shutdown => break,
            AttemptEnd::Failed(e) => {
                state.send_replace(SessionState::Disconnected);
                let delay = backoff.next_delay();
                warn!(error = %e, delay = ?delay, "Bridge attempt failed, reconnecting");

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown_rx.recv() => {
                        debug!("Shutdown during reconnect wait");
                        state.send_replace(SessionState::Closing);
                        break;
                    }
                }
            }
        }
    }

    state.send_replace(SessionState::Disconnected);
    info!("Bridge client stopped");
}

/// One cycle: connect, authenticate, serve the session, tear down
async fn run_attempt(
    config: &BridgeConfig,
    transport: &dyn Transport,
    state: &watch::Sender<SessionState>,
    outbound: &OutboundSlot,
    events_tx: &broadcast::Sender<ControlMessage>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    backoff: &mut Backoff,
) -> AttemptEnd {
    state.send_replace(SessionState::Connecting);
    debug!(url = %config.url, "Opening transport");

    let connect = tokio::select! {
        result = timeout(config.connect_timeout(), transport.connect(&config.url)) => result,
        _ = shutdown_rx.recv() => {
            state.send_replace(SessionState::Closing);
            return AttemptEnd::Shutdown;
        }
    };

    let (mut sink, mut stream) = match connect {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return AttemptEnd::Failed(e),
        Err(_) => {
            return AttemptEnd::Failed(BridgeError::ConnectFailure(format!(
                "no connection within {}ms",
                config.connect_timeout_ms
            )))
        }
    };

    state.send_replace(SessionState::Authenticating);
    let hello = match protocol::encode(&protocol::hello_frame(config)) {
        Ok(frame) => frame,
        Err(e) => {
            close_bounded(sink.as_mut(), config.handshake_timeout()).await;
            return AttemptEnd::Failed(e);
        }
    };
    if let Err(e) = send_bounded(sink.as_mut(), hello, config.handshake_timeout()).await {
        close_bounded(sink.as_mut(), config.handshake_timeout()).await;
        return AttemptEnd::Failed(e);
    }

    let handshake = tokio::select! {
        result = timeout(config.handshake_timeout(), wait_for_ack(stream.as_mut())) => {
            match result {
                Ok(inner) => inner,
                Err(_) => Err(BridgeError::HandshakeTimeout),
            }
        }
        _ = shutdown_rx.recv() => {
            state.send_replace(SessionState::Closing);
            close_bounded(sink.as_mut(), config.handshake_timeout()).await;
            return AttemptEnd::Shutdown;
        }
    };
    if let Err(e) = handshake {
        close_bounded(sink.as_mut(), config.handshake_timeout()).await;
        return AttemptEnd::Failed(e);
    }

    info!(url = %config.url, "Bridge session established");
    backoff.reset();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    *outbound.write().await = Some(event_tx);
    state.send_replace(SessionState::Connected);

    let mut heartbeat =
        HeartbeatMonitor::new(config.heartbeat_interval(), config.heartbeat_timeout());
    let write_bound = config.heartbeat_timeout();

    let end = run_session(
        sink.as_mut(),
        stream.as_mut(),
        &mut heartbeat,
        &mut event_rx,
        events_tx,
        shutdown_rx,
        write_bound,
    )
    .await;

    // Unpublish the sender before closing so a concurrent send fails fast
    // instead of racing a dying transport
    *outbound.write().await = None;
    if let AttemptEnd::Shutdown = end {
        state.send_replace(SessionState::Closing);
    }
    close_bounded(sink.as_mut(), write_bound).await;
    end
}

/// Wait for a handshake acknowledgement, consuming benign frames
async fn wait_for_ack(stream: &mut dyn FrameStream) -> Result<()> {
    loop {
        match stream.next_frame().await {
            Some(Ok(frame)) => {
                let message = protocol::decode(&frame);
                if message.is_handshake_ack() {
                    return Ok(());
                }
                match message {
                    ControlMessage::AuthError { message } => {
                        return Err(BridgeError::AuthRejected(
                            message.unwrap_or_else(|| "no reason given".to_string()),
                        ));
                    }
                    ControlMessage::Ping | ControlMessage::Pong => {
                        // Liveness traffic may arrive before the ack; it does
                        // not complete the handshake
                        debug!("Liveness frame before handshake ack");
                    }
                    other => {
                        debug!(frame = ?other, "Ignoring pre-ack frame");
                    }
                }
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(BridgeError::TransportClosed(
                    "stream ended during handshake".to_string(),
                ))
            }
        }
    }
}

/// Serve one connected session until it fails or shutdown arrives
async fn run_session(
    sink: &mut dyn FrameSink,
    stream: &mut dyn FrameStream,
    heartbeat: &mut HeartbeatMonitor,
    event_rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    events_tx: &broadcast::Sender<ControlMessage>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    write_bound: Duration,
) -> AttemptEnd {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown while connected");
                return AttemptEnd::Shutdown;
            }

            event = heartbeat.next_event() => match event {
                HeartbeatEvent::SendPing => {
                    let frame = match protocol::encode(&ControlMessage::Ping) {
                        Ok(frame) => frame,
                        Err(e) => return AttemptEnd::Failed(e),
                    };
                    if let Err(e) = send_bounded(sink, frame, write_bound).await {
                        return AttemptEnd::Failed(e);
                    }
                    heartbeat.ping_sent();
                }
                HeartbeatEvent::TimedOut => {
                    return AttemptEnd::Failed(BridgeError::HeartbeatTimeout);
                }
            },

            event = event_rx.recv() => {
                // The sender half sits in the published slot until teardown,
                // so the channel cannot end while the session runs
                if let Some(event) = event {
                    let frame = match protocol::encode(&event.into_frame()) {
                        Ok(frame) => frame,
                        Err(e) => return AttemptEnd::Failed(e),
                    };
                    if let Err(e) = send_bounded(sink, frame, write_bound).await {
                        return AttemptEnd::Failed(e);
                    }
                }
            }

            frame = stream.next_frame() => match frame {
                Some(Ok(text)) => {
                    if let Some(end) =
                        handle_frame(&text, sink, heartbeat, events_tx, write_bound).await
                    {
                        return end;
                    }
                }
                Some(Err(e)) => return AttemptEnd::Failed(e),
                None => {
                    return AttemptEnd::Failed(BridgeError::TransportClosed(
                        "stream ended".to_string(),
                    ));
                }
            },
        }
    }
}

/// Process one inbound frame while connected
async fn handle_frame(
    text: &str,
    sink: &mut dyn FrameSink,
    heartbeat: &mut HeartbeatMonitor,
    events_tx: &broadcast::Sender<ControlMessage>,
    write_bound: Duration,
) -> Option<AttemptEnd> {
    match protocol::decode(text) {
        ControlMessage::Ping => {
            heartbeat.liveness();
            let frame = match protocol::encode(&ControlMessage::Pong) {
                Ok(frame) => frame,
                Err(e) => return Some(AttemptEnd::Failed(e)),
            };
            if let Err(e) = send_bounded(sink, frame, write_bound).await {
                return Some(AttemptEnd::Failed(e));
            }
        }
        ControlMessage::Pong => {
            heartbeat.liveness();
        }
        message @ ControlMessage::Console { .. } => {
            // No receivers is the normal fire-and-forget case
            let _ = events_tx.send(message);
        }
        message @ ControlMessage::Error { .. } => {
            let _ = events_tx.send(message);
        }
        ControlMessage::Unknown => {
            debug!("Ignoring unrecognized frame");
        }
        other => {
            debug!(frame = ?other, "Ignoring out-of-phase control frame");
        }
    }
    None
}

/// Write one frame with an upper bound; a stalled transport ends the attempt
/// instead of wedging the loop
async fn send_bounded(sink: &mut dyn FrameSink, frame: String, bound: Duration) -> Result<()> {
    match timeout(bound, sink.send_frame(frame)).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::TransportClosed(format!(
            "write stalled for {}ms",
            bound.as_millis()
        ))),
    }
}

/// Close with the same bound; a close that stalls past it is abandoned
async fn close_bounded(sink: &mut dyn FrameSink, bound: Duration) {
    if timeout(bound, sink.close()).await.is_err() {
        debug!("Transport close stalled, abandoning the connection");
    }
}
