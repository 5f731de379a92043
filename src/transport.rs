//! Transport adapter
//!
//! The connection loop only sees the traits here, so tests can substitute an
//! in-memory transport for the WebSocket one. Frames are text: the bridge
//! protocol is JSON, and WebSocket-level ping/pong/binary traffic is
//! transport detail the adapter absorbs.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::{BridgeError, Result};

/// Write half of an open bridge connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame
    async fn send_frame(&mut self, frame: String) -> Result<()>;

    /// Close the connection; errors are ignored, the peer may already be gone
    async fn close(&mut self);
}

/// Read half of an open bridge connection
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound text frame; `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// Capability to open framed duplex connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production WebSocket transport
#[derive(Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::ConnectFailure(e.to_string()))?;
        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsStream { read })))
    }
}

struct WsSink {
    write: SplitSink<WsSocket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: String) -> Result<()> {
        self.write
            .send(Message::Text(frame))
            .await
            .map_err(|e| BridgeError::TransportClosed(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.write.close().await;
    }
}

struct WsStream {
    read: SplitStream<WsSocket>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        debug!("Peer closed connection: {} {}", frame.code, frame.reason);
                    }
                    return None;
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers socket pings itself
                    continue;
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!("Ignoring {}-byte binary frame", data.len());
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(BridgeError::TransportClosed(e.to_string()))),
                None => return None,
            }
        }
    }
}
