//! Outbound messages.

use serde::{Deserialize, Serialize};

use crate::{GameId, GameMode, GameSnapshot, PlayerId, PlayerScore};

/// A message the server sends to one client.
///
/// Serialized as `{"messageType": "...", "payload": ...}`; variants without
/// data omit the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", content = "payload", rename_all = "snake_case")]
pub enum Response {
    Connected { player_id: PlayerId },
    QueueJoined { game_mode: GameMode },
    QueueLeft { game_mode: GameMode },
    GameConfirmed { game_id: GameId },
    GameCancelled,
    /// Whole seconds until the round starts.
    SecsRoundStart(u64),
    ChallengeCreated { challenge_id: GameId },
    ChallengeStale { challenge_id: GameId },
    JoinRunningGameRejected,
    AlreadyInGame,
    /// Final ranking, highest level first.
    RoundResult(Vec<PlayerScore>),
    GameState(GameSnapshot),
}

impl Response {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::QueueJoined { .. } => "queue_joined",
            Self::QueueLeft { .. } => "queue_left",
            Self::GameConfirmed { .. } => "game_confirmed",
            Self::GameCancelled => "game_cancelled",
            Self::SecsRoundStart(_) => "secs_round_start",
            Self::ChallengeCreated { .. } => "challenge_created",
            Self::ChallengeStale { .. } => "challenge_stale",
            Self::JoinRunningGameRejected => "join_running_game_rejected",
            Self::AlreadyInGame => "already_in_game",
            Self::RoundResult(_) => "round_result",
            Self::GameState(_) => "game_state",
        }
    }
}
