//! Error types for the session layer.

use mazerace_protocol::{GameId, PlayerId};

/// Errors returned by [`GameHandle`](crate::GameHandle) and
/// [`ClientHandle`](crate::ClientHandle) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The session has terminated and no longer accepts requests.
    #[error("game {0} is closed")]
    Closed(GameId),

    /// The client is already bound to a different session.
    #[error("player {player_id} is already in game {game_id}")]
    AlreadyBound { player_id: PlayerId, game_id: GameId },

    /// The client's connection has shut down.
    #[error("client {0} is closed")]
    ClientClosed(PlayerId),
}
