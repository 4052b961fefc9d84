//! Round policies: what an active session broadcasts and when it ends.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mazerace_protocol::{GameMode, Response};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::game::Broadcast;
use crate::{GameConfig, GameHandle};

/// How an active round runs.
///
/// Every variant stamps the round start, broadcasts an initial snapshot and
/// then one snapshot per tick. They differ only in when the round ends.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundPolicy {
    /// Never ends on its own; runs until the session is torn down.
    Default,
    /// Ends `round_length` after the start.
    Sprint { round_length: Duration },
    /// Ends on the first tick where the maximum level exceeds `level_target`.
    Race { level_target: i32 },
}

impl RoundPolicy {
    pub fn for_mode(mode: GameMode, config: &GameConfig) -> Self {
        match mode {
            GameMode::Sprint => Self::Sprint {
                round_length: config.sprint_round_length,
            },
            GameMode::Race => Self::Race {
                level_target: config.race_level_target,
            },
        }
    }

    /// Drives the round until it finishes or the session closes.
    pub async fn start(self, game: GameHandle) {
        let game_id = game.id();
        let tick = game.config().tick_interval;

        game.state().stamp_start(unix_millis());
        tracing::info!(%game_id, policy = ?self, "round started");
        if !game.submit(Broadcast::Frame(Response::GameState(game.snapshot()))).await {
            return;
        }

        let mut ticker = time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = match self {
            Self::Sprint { round_length } => Some(Instant::now() + round_length),
            _ => None,
        };
        let round_over = async move {
            match deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(round_over);

        loop {
            tokio::select! {
                biased;
                _ = game.closed() => return,
                _ = &mut round_over => break,
                _ = ticker.tick() => {
                    if let Self::Race { level_target } = self {
                        if game.state().max_level() > level_target {
                            break;
                        }
                    }
                    if !game.submit(Broadcast::Frame(Response::GameState(game.snapshot()))).await {
                        return;
                    }
                }
            }
        }

        let result = game.round_result();
        tracing::info!(%game_id, ?result, "round completed");
        game.submit(Broadcast::Final(Response::RoundResult(result))).await;
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
