//! Server configuration.

use std::time::Duration;

use mazerace_game::{DEFAULT_OUTBOUND_CAPACITY, GameConfig};
use serde::{Deserialize, Serialize};

/// Settings for a [`MazeServer`](crate::MazeServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Depth of each client's outbound queue. A client that falls this far
    /// behind is evicted from its session.
    pub outbound_capacity: usize,

    /// How long a new connection has to send its `connect` frame.
    pub handshake_timeout: Duration,

    /// Timing for every session the server spawns.
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            handshake_timeout: Duration::from_secs(5),
            game: GameConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validated(mut self) -> Self {
        if self.outbound_capacity == 0 {
            tracing::warn!("outbound_capacity is 0, using {DEFAULT_OUTBOUND_CAPACITY}");
            self.outbound_capacity = DEFAULT_OUTBOUND_CAPACITY;
        }
        if self.handshake_timeout.is_zero() {
            tracing::warn!("handshake_timeout is 0, using 5s");
            self.handshake_timeout = Duration::from_secs(5);
        }
        self.game = self.game.validated();
        self
    }
}
