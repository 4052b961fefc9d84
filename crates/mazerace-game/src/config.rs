//! Session configuration and lifecycle phase.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

/// Timing and round parameters shared by every session a server spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// How often an active round broadcasts a `game_state` snapshot.
    pub tick_interval: Duration,

    /// Full pre-round countdown.
    pub countdown: Duration,

    /// Countdown is cut to this once every player is ready.
    pub ready_countdown: Duration,

    /// Granularity of `secs_round_start` announcements.
    pub countdown_step: Duration,

    /// Length of a sprint round.
    pub sprint_round_length: Duration,

    /// A race ends on the first tick where some player's level exceeds this.
    pub race_level_target: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            countdown: Duration::from_secs(30),
            ready_countdown: Duration::from_secs(5),
            countdown_step: Duration::from_secs(1),
            sprint_round_length: Duration::from_secs(60),
            race_level_target: 10,
        }
    }
}

impl GameConfig {
    /// Replaces values that would stall or break a session with defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.tick_interval.is_zero() {
            tracing::warn!("tick_interval is 0, using {:?}", defaults.tick_interval);
            self.tick_interval = defaults.tick_interval;
        }
        if self.countdown_step.is_zero() {
            tracing::warn!("countdown_step is 0, using {:?}", defaults.countdown_step);
            self.countdown_step = defaults.countdown_step;
        }
        if self.ready_countdown > self.countdown {
            tracing::warn!(
                ready = ?self.ready_countdown,
                countdown = ?self.countdown,
                "ready_countdown exceeds countdown, clamping"
            );
            self.ready_countdown = self.countdown;
        }
        if self.sprint_round_length.is_zero() {
            tracing::warn!(
                "sprint_round_length is 0, using {:?}",
                defaults.sprint_round_length
            );
            self.sprint_round_length = defaults.sprint_round_length;
        }
        if self.race_level_target < 0 {
            tracing::warn!(
                level_target = self.race_level_target,
                "negative race_level_target, using 0"
            );
            self.race_level_target = 0;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// GamePhase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a session.
///
/// ```text
/// Forming → CountingDown → Active → Terminated
/// ```
///
/// Every phase before `Terminated` may also jump straight to it: an empty
/// forming session, an orphaned countdown or round, or a cancelled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamePhase {
    Forming,
    CountingDown,
    Active,
    Terminated,
}

impl GamePhase {
    /// Only a forming session accepts new players.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Forming)
    }

    /// Countdown or round in progress; losing a player now cancels the game.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::CountingDown | Self::Active)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// The next phase on the happy path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Forming => Some(Self::CountingDown),
            Self::CountingDown => Some(Self::Active),
            Self::Active => Some(Self::Terminated),
            Self::Terminated => None,
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (target == Self::Terminated && self != Self::Terminated)
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forming => write!(f, "forming"),
            Self::CountingDown => write!(f, "counting_down"),
            Self::Active => write!(f, "active"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}
