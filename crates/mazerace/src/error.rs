//! Error types for matchmaking and the server as a whole.

use mazerace_game::GameError;
use mazerace_protocol::{GameId, PlayerId, ProtocolError};
use mazerace_transport::TransportError;

/// Why a matchmaking request was refused.
///
/// Each of these has already been answered on the client's connection
/// where the protocol has a response for it; the error is for logging.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The client is bound to a session and cannot queue or challenge.
    #[error("player {0} is already in a game")]
    AlreadyInGame(PlayerId),

    /// `leave_queue` from a client that is in no queue.
    #[error("player {0} is not queued")]
    NotQueued(PlayerId),

    /// The challenge was already taken, expired or never existed.
    #[error("challenge {0} is no longer open")]
    StaleChallenge(GameId),

    #[error(transparent)]
    Game(#[from] GameError),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum MazeError {
    /// Binding, accepting or talking to a socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error(transparent)]
    Match(#[from] MatchError),

    /// The client sent no `connect` frame in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The client went away before completing the handshake.
    #[error("connection closed before handshake")]
    HandshakeAborted,
}
