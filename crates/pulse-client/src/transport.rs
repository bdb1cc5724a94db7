//! Streaming transport.
//!
//! The manager never touches a socket directly. A [`Connector`] opens a
//! connection and returns a [`TransportLink`]: a sender for outbound
//! messages and a receiver of [`TransportEvent`]s. [`WsConnector`] is the
//! `tokio-tungstenite` implementation; tests substitute their own.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use pulse_core::ProgressError;
use pulse_core::constants::{CLOSE_ABNORMAL, CLOSE_NO_STATUS};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default capacity of the link channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// How a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code; `None` if the transport could not tell.
    pub code: Option<u16>,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseInfo {
    /// Close info with a code and reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }
}

/// Something that happened on an open connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the server.
    Frame(String),
    /// The connection closed. Always the last event.
    Closed(CloseInfo),
    /// A transport error. A [`TransportEvent::Closed`] follows.
    Error(String),
}

/// Something the client wants to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A text frame.
    Text(String),
    /// Close the connection with a code and reason.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Channel pair bridging one open connection.
#[derive(Debug)]
pub struct TransportLink {
    /// Outbound messages. Dropping every sender closes the connection.
    pub outbound: mpsc::Sender<OutboundMessage>,
    /// Inbound events. Dropping the receiver stops reading.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens streaming connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    async fn open(&self, url: &str) -> Result<TransportLink, ProgressError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket implementation
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    capacity: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl WsConnector {
    /// Connector whose link channels hold `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, ProgressError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| ProgressError::Transport {
                url: url.to_owned(),
                message: e.to_string(),
            })?;
        debug!(%url, "websocket open");

        let (out_tx, out_rx) = mpsc::channel(self.capacity);
        let (in_tx, in_rx) = mpsc::channel(self.capacity);
        let (sink, stream) = ws.split();
        let _ = tokio::spawn(write_loop(sink, out_rx));
        let _ = tokio::spawn(read_loop(stream, in_tx));

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = outbound.recv().await {
        match message {
            OutboundMessage::Text(text) => {
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    debug!(%error, "websocket write failed");
                    return;
                }
            }
            OutboundMessage::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WsStream>,
    inbound: mpsc::Sender<TransportEvent>,
) {
    loop {
        let event = match stream.next().await {
            Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => TransportEvent::Frame(text),
                Err(_) => {
                    warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let info = match frame {
                    Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.as_str()),
                    None => CloseInfo::new(CLOSE_NO_STATUS, ""),
                };
                let _ = inbound.send(TransportEvent::Closed(info)).await;
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(error)) => {
                let _ = inbound.send(TransportEvent::Error(error.to_string())).await;
                let _ = inbound
                    .send(TransportEvent::Closed(CloseInfo::new(CLOSE_ABNORMAL, "")))
                    .await;
                return;
            }
            None => {
                let _ = inbound
                    .send(TransportEvent::Closed(CloseInfo::new(CLOSE_ABNORMAL, "")))
                    .await;
                return;
            }
        };
        if inbound.send(event).await.is_err() {
            return;
        }
    }
}
