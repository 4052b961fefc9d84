//! Inbound messages: the raw envelope and its typed, validated forms.
//!
//! Parsing is two-step. The codec turns a frame into an [`Envelope`],
//! then [`Command::try_from`] (or [`Handshake::try_from`] for the first
//! frame) dispatches on `messageType`, decodes the payload with unknown
//! fields rejected, and validates field values.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::{GameId, GameMode, PlayerUpdate, ProtocolError};

/// Longest accepted username, in characters, after trimming.
pub const MAX_USERNAME_LEN: usize = 24;
/// Longest accepted flag code, in characters.
pub const MAX_FLAG_LEN: usize = 16;

/// `{"messageType": "...", "payload": ...}` before the payload is typed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageType")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// An absent payload, `null` and `{}` all count as empty.
    pub fn has_payload(&self) -> bool {
        match &self.payload {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    fn payload<T: DeserializeOwned>(self, message_type: &'static str) -> Result<T, ProtocolError> {
        if !self.has_payload() {
            return Err(ProtocolError::PayloadRequired { message_type });
        }
        serde_json::from_value(self.payload)
            .map_err(|source| ProtocolError::PayloadFormat { message_type, source })
    }
}

/// A validated client command received after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    JoinQueue { game_mode: GameMode },
    LeaveQueue,
    PlayerUpdate(PlayerUpdate),
    PlayerReady,
    CreateChallenge { game_mode: GameMode },
    AcceptChallenge { challenge_id: GameId },
}

impl Command {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::JoinQueue { .. } => "join_queue",
            Self::LeaveQueue => "leave_queue",
            Self::PlayerUpdate(_) => "player_update",
            Self::PlayerReady => "player_ready",
            Self::CreateChallenge { .. } => "create_challenge",
            Self::AcceptChallenge { .. } => "accept_challenge",
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GameModePayload {
    game_mode: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ChallengePayload {
    challenge_id: String,
}

fn parse_game_mode(message_type: &'static str, payload: GameModePayload) -> Result<GameMode, ProtocolError> {
    GameMode::from_name(&payload.game_mode).ok_or_else(|| ProtocolError::Validation {
        message_type,
        field: "game_mode",
        reason: format!("must be one of: {}, {}", GameMode::Sprint, GameMode::Race),
    })
}

fn validate_update(update: PlayerUpdate) -> Result<PlayerUpdate, ProtocolError> {
    let invalid = |field, reason: &str| ProtocolError::Validation {
        message_type: "player_update",
        field,
        reason: reason.to_string(),
    };
    if update.level < 0 {
        return Err(invalid("level", "cannot be negative"));
    }
    if !update.position.x.is_finite() || !update.position.y.is_finite() {
        return Err(invalid("position", "must be finite"));
    }
    if !update.rotation.is_finite() {
        return Err(invalid("rotation", "must be finite"));
    }
    Ok(update)
}

impl TryFrom<Envelope> for Command {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.message_type.as_str() {
            "join_queue" => {
                let payload = envelope.payload("join_queue")?;
                Ok(Self::JoinQueue {
                    game_mode: parse_game_mode("join_queue", payload)?,
                })
            }
            "leave_queue" => Ok(Self::LeaveQueue),
            "player_update" => {
                let update = envelope.payload("player_update")?;
                Ok(Self::PlayerUpdate(validate_update(update)?))
            }
            "player_ready" => Ok(Self::PlayerReady),
            "create_challenge" => {
                let payload = envelope.payload("create_challenge")?;
                Ok(Self::CreateChallenge {
                    game_mode: parse_game_mode("create_challenge", payload)?,
                })
            }
            "accept_challenge" => {
                let payload: ChallengePayload = envelope.payload("accept_challenge")?;
                let uuid = Uuid::parse_str(&payload.challenge_id).map_err(|e| {
                    ProtocolError::Validation {
                        message_type: "accept_challenge",
                        field: "challenge_id",
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self::AcceptChallenge {
                    challenge_id: GameId::from_uuid(uuid),
                })
            }
            "connect" => Err(ProtocolError::UnexpectedMessageType(envelope.message_type)),
            _ => Err(ProtocolError::UnknownMessageType(envelope.message_type)),
        }
    }
}

/// The `connect` frame that opens every connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Handshake {
    pub username: String,
    #[serde(default)]
    pub flag: String,
}

impl TryFrom<Envelope> for Handshake {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        if envelope.message_type != "connect" {
            return Err(ProtocolError::UnexpectedMessageType(envelope.message_type));
        }
        let mut handshake: Handshake = envelope.payload("connect")?;

        let username = handshake.username.trim();
        let len = username.chars().count();
        if len == 0 || len > MAX_USERNAME_LEN {
            return Err(ProtocolError::Validation {
                message_type: "connect",
                field: "username",
                reason: format!("must be 1 to {MAX_USERNAME_LEN} characters"),
            });
        }
        handshake.username = username.to_string();

        if handshake.flag.chars().count() > MAX_FLAG_LEN {
            return Err(ProtocolError::Validation {
                message_type: "connect",
                field: "flag",
                reason: format!("must be at most {MAX_FLAG_LEN} characters"),
            });
        }
        Ok(handshake)
    }
}
