//! Authoritative per-session state.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use mazerace_protocol::{GameId, GameSnapshot, Player, PlayerId, PlayerScore, PlayerUpdate};
use mazerace_registry::Registry;

/// Seed, players, round start and the running maximum level of a session.
///
/// Player entries are inserted and removed only by the session's control
/// loop; connections write their own entry through [`apply_update`].
///
/// [`apply_update`]: GameState::apply_update
#[derive(Debug)]
pub struct GameState {
    seed: u32,
    players: Registry<PlayerId, Player>,
    start_time: AtomicI64,
    max_level: AtomicI32,
}

impl GameState {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            players: Registry::new(),
            start_time: AtomicI64::new(0),
            max_level: AtomicI32::new(0),
        }
    }

    /// Maze generation seed shared by every client in the session.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn players(&self) -> &Registry<PlayerId, Player> {
        &self.players
    }

    /// Unix milliseconds at round start, 0 before that.
    pub fn start_time(&self) -> i64 {
        self.start_time.load(Ordering::Acquire)
    }

    pub fn stamp_start(&self, unix_millis: i64) {
        self.start_time.store(unix_millis, Ordering::Release);
    }

    /// Highest level any player has reported this round.
    pub fn max_level(&self) -> i32 {
        self.max_level.load(Ordering::Acquire)
    }

    /// Writes a client update into the player's entry and raises the
    /// maximum level. Returns `false` if the player is not in the session.
    pub fn apply_update(&self, player_id: PlayerId, update: &PlayerUpdate) -> bool {
        let applied = self.players.update(&player_id, |player| player.apply(update));
        if applied {
            self.max_level.fetch_max(update.level, Ordering::AcqRel);
        }
        applied
    }

    /// Every player, ascending by id.
    pub fn snapshot(&self, game_id: GameId) -> GameSnapshot {
        let mut players = self.players.values();
        players.sort_by_key(|player| player.id);
        GameSnapshot {
            game_id,
            seed: self.seed,
            start_time: self.start_time(),
            players,
        }
    }

    /// Final ranking: level descending, equal levels by ascending player id.
    pub fn round_result(&self) -> Vec<PlayerScore> {
        let mut players = self.players.values();
        players.sort_by(|a, b| b.level.cmp(&a.level).then(a.id.cmp(&b.id)));
        players.iter().map(Player::score).collect()
    }
}

#[cfg(test)]
mod tests {
    use mazerace_protocol::Position;

    use super::*;

    fn add(state: &GameState, name: &str, level: i32) -> PlayerId {
        let mut player = Player::new(name, "US");
        player.level = level;
        let id = player.id;
        state.players().set(id, player);
        id
    }

    #[test]
    fn test_round_result_orders_by_level_descending() {
        let state = GameState::new(7);
        add(&state, "p5", 5);
        add(&state, "p3", 3);
        add(&state, "p7", 7);

        let levels: Vec<i32> = state.round_result().iter().map(|s| s.level).collect();
        assert_eq!(levels, vec![7, 5, 3]);
    }

    #[test]
    fn test_round_result_ties_are_stable_across_calls() {
        let state = GameState::new(7);
        let a = add(&state, "a", 4);
        let b = add(&state, "b", 4);
        add(&state, "c", 9);

        let first = state.round_result();
        for _ in 0..10 {
            assert_eq!(state.round_result(), first);
        }

        let (low, high) = if a < b { ("a", "b") } else { ("b", "a") };
        assert_eq!(first[0].username, "c");
        assert_eq!(first[1].username, low);
        assert_eq!(first[2].username, high);
    }

    #[test]
    fn test_round_result_empty_session() {
        assert!(GameState::new(1).round_result().is_empty());
    }

    #[test]
    fn test_apply_update_raises_max_level_monotonically() {
        let state = GameState::new(1);
        let id = add(&state, "runner", 1);
        let update = |level| PlayerUpdate {
            level,
            position: Position::new(1.0, 1.0),
            rotation: 0.0,
        };

        assert!(state.apply_update(id, &update(6)));
        assert!(state.apply_update(id, &update(2)));
        assert_eq!(state.max_level(), 6);
        assert_eq!(state.players().get(&id).map(|p| p.level), Some(2));
    }

    #[test]
    fn test_apply_update_unknown_player_is_ignored() {
        let state = GameState::new(1);
        let update = PlayerUpdate {
            level: 50,
            position: Position::default(),
            rotation: 0.0,
        };
        assert!(!state.apply_update(PlayerId::new(), &update));
        assert_eq!(state.max_level(), 0);
        assert!(state.players().is_empty());
    }

    #[test]
    fn test_snapshot_sorts_players_and_carries_start_time() {
        let state = GameState::new(99);
        for name in ["a", "b", "c", "d"] {
            add(&state, name, 1);
        }
        state.stamp_start(1_700_000_000_000);

        let game_id = GameId::new();
        let snapshot = state.snapshot(game_id);
        assert_eq!(snapshot.game_id, game_id);
        assert_eq!(snapshot.seed, 99);
        assert_eq!(snapshot.start_time, 1_700_000_000_000);
        assert!(snapshot.players.windows(2).all(|w| w[0].id < w[1].id));
    }
}
