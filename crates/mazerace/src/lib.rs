//! # mazerace
//!
//! Session layer for a real-time two-player maze racing game.
//!
//! Clients connect over WebSocket, introduce themselves with a `connect`
//! frame, then queue for a sprint or race (or challenge a friend). The
//! [`Matchmaker`] pairs them into a session, the session counts down, runs
//! the round and streams authoritative state until someone wins or a
//! player is lost.
//!
//! ```text
//! Transport → Client (read/write pumps) → Matchmaker → Game session
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mazerace::prelude::*;
//!
//! # async fn start() -> Result<(), MazeError> {
//! let server = MazeServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .game_config(GameConfig::default())
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod connection;
mod error;
mod matchmaker;
mod server;

pub use config::ServerConfig;
pub use connection::Client;
pub use error::{MatchError, MazeError};
pub use matchmaker::{Challenge, Matchmaker};
pub use server::{MazeServer, MazeServerBuilder, handshake};

pub mod prelude {
    pub use crate::{Client, MatchError, Matchmaker, MazeError, MazeServer, MazeServerBuilder, ServerConfig};
    pub use mazerace_game::{ClientHandle, ClientStatus, GameConfig, GameHandle, GamePhase, RoundPolicy};
    pub use mazerace_protocol::{GameId, GameMode, Player, PlayerId, Response};
}
