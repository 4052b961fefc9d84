//! Game sessions for the maze race server.
//!
//! A session ([`GameHandle`]) pairs two clients, counts down, runs a round
//! under a [`RoundPolicy`] and tears itself down when the round ends or a
//! player is lost. Each session is one control-loop task fed by channels.
//!
//! # Key types
//!
//! - [`GameHandle`]: attach/detach clients, read state, cancel
//! - [`ClientHandle`]: the session-facing side of a connection
//! - [`GamePhase`]: lifecycle state machine
//! - [`RoundPolicy`]: default, sprint and race rounds
//! - [`GameConfig`]: countdown and round timing

mod client;
mod config;
mod countdown;
mod error;
mod game;
mod policy;
mod state;

pub use client::{ClientHandle, ClientStatus, DEFAULT_OUTBOUND_CAPACITY, OutboundError};
pub use config::{GameConfig, GamePhase};
pub use error::GameError;
pub use game::{GameHandle, Termination, spawn_game, spawn_game_with_policy};
pub use policy::RoundPolicy;
pub use state::GameState;
