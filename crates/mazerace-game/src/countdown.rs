//! Pre-round countdown worker.

use mazerace_protocol::Response;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::GameHandle;
use crate::game::Broadcast;

/// Announces the remaining seconds every step and signals `done` at zero.
///
/// Once all players are ready the remaining time is cut to the ready
/// threshold. The check runs before the step is subtracted, so the round
/// starts at most one threshold after the last player readied up.
pub(crate) async fn run(game: GameHandle, done: oneshot::Sender<()>) {
    let config = game.config();
    let step = config.countdown_step;
    let threshold = config.ready_countdown;
    let mut remaining = config.countdown;

    tracing::info!(game_id = %game.id(), ?remaining, "countdown started");
    let mut ticker = time::interval_at(Instant::now() + step, step);

    loop {
        tokio::select! {
            biased;
            _ = game.closed() => return,
            _ = ticker.tick() => {}
        }

        if remaining > threshold && game.all_ready() {
            tracing::info!(game_id = %game.id(), ?threshold, "all players ready, shortening countdown");
            remaining = threshold;
        }
        remaining = remaining.saturating_sub(step);

        let announce = Response::SecsRoundStart(remaining.as_secs());
        if !game.submit(Broadcast::Frame(announce)).await {
            return;
        }
        if remaining.is_zero() {
            let _ = done.send(());
            return;
        }
    }
}
