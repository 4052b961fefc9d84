//! In-process connection pair.
//!
//! [`memory_pair`] returns a [`MemoryConnection`] for the server side and a
//! [`MemoryPeer`] that plays the remote client. Frames are moved over
//! unbounded channels, so neither side ever blocks on the other.

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, TransportError};

/// Creates a connected server/peer pair.
pub fn memory_pair() -> (MemoryConnection, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (closed, _) = watch::channel(false);

    let conn = MemoryConnection {
        id: ConnectionId::next(),
        inbound: Mutex::new(from_peer),
        outbound: Mutex::new(Some(to_peer)),
        closed,
    };
    let peer = MemoryPeer {
        tx: Some(to_server),
        rx: from_server,
    };
    (conn, peer)
}

/// Server side of an in-process connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    closed: watch::Sender<bool>,
}

impl MemoryConnection {
    /// Returns `true` once [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or(TransportError::Closed(self.id))?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "memory peer dropped",
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Ok(None),
            frame = inbound.recv() => Ok(frame),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.send_replace(true);
        // Dropping the sender ends the peer's stream after it drains.
        self.outbound.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Remote side of an in-process connection, driven by tests.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Sends a frame to the server. Returns `false` if the server side is gone.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(data.into()).is_ok(),
            None => false,
        }
    }

    /// Receives the next frame from the server, `None` once it has closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Receives the next frame as UTF-8 text.
    pub async fn recv_text(&mut self) -> Option<String> {
        let frame = self.recv().await?;
        String::from_utf8(frame).ok()
    }

    /// Returns a frame that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Simulates the remote end hanging up.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}
