//! Transport layer for the maze race server.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the session
//! layer is written against, plus two implementations:
//!
//! - [`WebSocketTransport`] / [`WebSocketConnection`]: the production
//!   transport (feature `websocket`, enabled by default)
//! - [`MemoryConnection`]: an in-process connection pair used by tests
//!
//! A [`Connection`] is shared between a reader task and a writer task, so
//! `send` and `recv` take `&self` and must not block each other.

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryPeer, memory_pair};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of new client connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Resolves with the next connection that completed its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive whole frames.
///
/// The returned futures are `Send` so connection pumps can run on
/// `tokio::spawn`ed tasks for any implementation.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one frame to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// `Ok(None)` means the peer closed the connection.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection. Closing twice is not an error.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_round_trips_raw_value() {
        assert_eq!(ConnectionId::new(42).into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display_is_prefixed() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }
}
