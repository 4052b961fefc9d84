//! Model types shared by the wire format and the session layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a player, serialized as a UUID string.
///
/// Ordering follows the UUID bytes and is used to break ties in round
/// rankings, so it must stay stable for the lifetime of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    /// Allocates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a game session. A challenge is addressed by the
/// id of the session it created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(Uuid);

impl GameId {
    /// Allocates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The two round variants players can queue for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Fixed-length round; highest level when time runs out wins.
    Sprint,
    /// First player past the level target ends the round.
    Race,
}

impl GameMode {
    pub const ALL: [GameMode; 2] = [GameMode::Sprint, GameMode::Race];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sprint => "sprint",
            Self::Race => "race",
        }
    }

    /// Parses the lowercase wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.as_str() == name)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sprite position inside the maze.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Where a player sits before its first update: off the visible maze.
    pub const OFFSCREEN: Position = Position::new(-1000.0, -1000.0);
}

/// A participant's profile plus its live in-round state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub active: bool,
    pub username: String,
    pub flag: String,
    pub level: i32,
    pub position: Position,
    pub rotation: f64,
}

impl Player {
    /// Creates an inactive player at level 1, parked off screen.
    pub fn new(username: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            id: PlayerId::new(),
            active: false,
            username: username.into(),
            flag: flag.into(),
            level: 1,
            position: Position::OFFSCREEN,
            rotation: 0.0,
        }
    }

    /// Overwrites the in-round fields with a client update.
    pub fn apply(&mut self, update: &PlayerUpdate) {
        self.level = update.level;
        self.position = update.position;
        self.rotation = update.rotation;
    }

    pub fn score(&self) -> PlayerScore {
        PlayerScore {
            username: self.username.clone(),
            flag: self.flag.clone(),
            level: self.level,
        }
    }
}

/// In-round state reported by a client on every `player_update`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerUpdate {
    pub level: i32,
    pub position: Position,
    pub rotation: f64,
}

/// One row of a `round_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub username: String,
    pub flag: String,
    pub level: i32,
}

/// Authoritative session state as broadcast in `game_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: GameId,
    pub seed: u32,
    /// Unix milliseconds; 0 until the round starts.
    pub start_time: i64,
    /// Ascending by player id.
    pub players: Vec<Player>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_new_defaults() {
        let player = Player::new("alice", "NL");
        assert_eq!(player.username, "alice");
        assert_eq!(player.flag, "NL");
        assert_eq!(player.level, 1);
        assert_eq!(player.position, Position::new(-1000.0, -1000.0));
        assert_eq!(player.rotation, 0.0);
        assert!(!player.active);
    }

    #[test]
    fn test_player_new_ids_are_unique() {
        assert_ne!(Player::new("a", "").id, Player::new("a", "").id);
    }

    #[test]
    fn test_player_apply_overwrites_round_fields() {
        let mut player = Player::new("bob", "DE");
        player.apply(&PlayerUpdate {
            level: 4,
            position: Position::new(3.5, -2.0),
            rotation: 90.0,
        });
        assert_eq!(player.level, 4);
        assert_eq!(player.position, Position::new(3.5, -2.0));
        assert_eq!(player.rotation, 90.0);
        assert_eq!(player.username, "bob");
    }

    #[test]
    fn test_player_serializes_with_wire_field_names() {
        let player = Player::new("carol", "US");
        let value = serde_json::to_value(&player).unwrap();
        assert_eq!(value["id"], player.id.to_string());
        assert_eq!(value["active"], false);
        assert_eq!(value["level"], 1);
        assert_eq!(value["position"]["x"], -1000.0);
        assert_eq!(value["rotation"], 0.0);
    }

    #[test]
    fn test_game_mode_wire_names() {
        assert_eq!(serde_json::to_string(&GameMode::Sprint).unwrap(), "\"sprint\"");
        assert_eq!(GameMode::from_name("race"), Some(GameMode::Race));
        assert_eq!(GameMode::from_name("Race"), None);
        assert_eq!(GameMode::Race.to_string(), "race");
    }

    #[test]
    fn test_snapshot_empty_players_serializes_as_array() {
        let snapshot = GameSnapshot {
            game_id: GameId::new(),
            seed: 123,
            start_time: 0,
            players: Vec::new(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["seed"], 123);
        assert_eq!(value["start_time"], 0);
        assert!(value["players"].as_array().unwrap().is_empty());
    }
}
