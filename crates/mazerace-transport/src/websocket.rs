//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The stream is split into its sink and source halves, each behind its own
//! lock, so a reader parked in `recv` never holds up a writer.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = WebSocketStream<TcpStream>;

/// Listens on a TCP socket and upgrades every accepted stream to WebSocket.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds the listener. The error names the address on failure.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "listening for websocket clients");
        Ok(Self { listener })
    }

    /// Returns the address the listener is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::AcceptFailed)?;
        let ws = tokio_tungstenite::accept_async(tcp)
            .await
            .map_err(io_error(ErrorKind::ConnectionRefused))
            .map_err(TransportError::AcceptFailed)?;

        let id = ConnectionId::next();
        tracing::debug!(conn_id = %id, %peer, "websocket upgrade complete");

        let (sink, source) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        })
    }
}

/// One upgraded client socket. Safe to share between a reader and a writer.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    source: Mutex<SplitStream<WsStream>>,
}

fn io_error(kind: ErrorKind) -> impl FnOnce(WsError) -> io::Error {
    move |e| io::Error::new(kind, e)
}

/// Payload bytes of a data frame; `None` for control frames.
fn payload(msg: Message) -> Option<Vec<u8>> {
    match msg {
        Message::Text(text) => Some(text.as_bytes().to_vec()),
        Message::Binary(data) => Some(data.to_vec()),
        _ => None,
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        // JSON goes out as text so browsers get a string.
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::binary(data.to_vec()),
        };
        let mut sink = self.sink.lock().await;
        sink.send(msg)
            .await
            .map_err(io_error(ErrorKind::BrokenPipe))
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut source = self.source.lock().await;
        while let Some(frame) = source.next().await {
            let msg = frame
                .map_err(io_error(ErrorKind::ConnectionReset))
                .map_err(TransportError::ReceiveFailed)?;
            if msg.is_close() {
                break;
            }
            if let Some(data) = payload(msg) {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        match sink.close().await {
            // The peer may have gone first.
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(io::Error::new(ErrorKind::BrokenPipe, e))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
