//! Integration tests for the session state machine.
//!
//! All tests run on a paused clock: timers fire as soon as every task is
//! idle, so a 30 second countdown finishes instantly and deterministically.

use std::time::Duration;

use mazerace_game::{
    ClientHandle, ClientStatus, GameConfig, GameError, GameHandle, GamePhase, RoundPolicy,
    spawn_game, spawn_game_with_policy,
};
use mazerace_protocol::{GameMode, Player, PlayerUpdate, Position, Response};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

// =========================================================================
// Helpers
// =========================================================================

fn client(name: &str, capacity: usize) -> (ClientHandle, mpsc::Receiver<Response>) {
    ClientHandle::new(Player::new(name, "US"), capacity)
}

/// Lets every other task run until the runtime is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn next(rx: &mut mpsc::Receiver<Response>) -> Response {
    tokio::time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("timed out waiting for a response")
        .expect("outbound queue closed")
}

async fn wait_terminated(game: &GameHandle) {
    let mut phase = game.subscribe_phase();
    phase
        .wait_for(|p| p.is_terminated())
        .await
        .expect("phase channel closed");
}

/// Spawns a session with two attached clients and drains `game_confirmed`.
async fn paired(
    config: GameConfig,
    policy: RoundPolicy,
) -> (
    GameHandle,
    (ClientHandle, mpsc::Receiver<Response>),
    (ClientHandle, mpsc::Receiver<Response>),
) {
    let game = spawn_game_with_policy(GameMode::Sprint, config, policy);
    let (a, mut a_rx) = client("alice", 256);
    let (b, mut b_rx) = client("bob", 256);
    game.attach(a.clone()).await.unwrap();
    game.attach(b.clone()).await.unwrap();

    let confirmed = Response::GameConfirmed { game_id: game.id() };
    assert_eq!(next(&mut a_rx).await, confirmed);
    assert_eq!(next(&mut b_rx).await, confirmed);
    (game, (a, a_rx), (b, b_rx))
}

fn update(level: i32) -> PlayerUpdate {
    PlayerUpdate {
        level,
        position: Position::new(10.0, 20.0),
        rotation: 90.0,
    }
}

// =========================================================================
// Forming
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_attach_single_client_binds_and_waits() {
    let game = spawn_game(GameMode::Race, GameConfig::default());
    let (a, mut a_rx) = client("alice", 8);

    game.attach(a.clone()).await.unwrap();
    settle().await;

    assert_eq!(game.phase(), GamePhase::Forming);
    assert_eq!(game.player_count(), 1);
    assert_eq!(a.game().map(|g| g.id()), Some(game.id()));
    let player = game.state().players().get(&a.id()).expect("player registered");
    assert!(player.active);
    assert!(matches!(a_rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_attach_bound_client_gets_already_in_game() {
    let first = spawn_game(GameMode::Race, GameConfig::default());
    let second = spawn_game(GameMode::Race, GameConfig::default());
    let (a, mut a_rx) = client("alice", 8);

    first.attach(a.clone()).await.unwrap();
    settle().await;
    second.attach(a.clone()).await.unwrap();

    assert_eq!(next(&mut a_rx).await, Response::AlreadyInGame);
    assert_eq!(a.game().map(|g| g.id()), Some(first.id()));
    assert_eq!(second.player_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_attach_closed_client_is_ignored() {
    let game = spawn_game(GameMode::Sprint, GameConfig::default());
    let (a, _a_rx) = client("alice", 8);
    a.cancel();

    game.attach(a.clone()).await.unwrap();
    settle().await;

    assert_eq!(game.player_count(), 0);
    assert!(!a.is_bound());
}

#[tokio::test(start_paused = true)]
async fn test_forming_game_terminates_when_last_client_detaches() {
    let game = spawn_game(GameMode::Sprint, GameConfig::default());
    let (a, _a_rx) = client("alice", 8);
    game.attach(a.clone()).await.unwrap();
    settle().await;

    assert!(game.try_detach(a.clone()));
    wait_terminated(&game).await;

    assert!(game.is_closed());
    assert!(!a.is_bound());
    assert_eq!(a.status(), ClientStatus::Idle);
    assert!(game.state().players().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_game_rejects_attach_and_detach() {
    let game = spawn_game(GameMode::Race, GameConfig::default());
    game.cancel();
    wait_terminated(&game).await;

    let (a, _a_rx) = client("alice", 8);
    assert_eq!(game.attach(a.clone()).await, Err(GameError::Closed(game.id())));
    assert!(!game.try_detach(a));
}

#[tokio::test(start_paused = true)]
async fn test_attach_and_confirm_reports_whether_client_bound() {
    let game = spawn_game(GameMode::Race, GameConfig::default());
    let (a, _a_rx) = client("alice", 8);
    let (b, _b_rx) = client("bob", 8);
    b.cancel();

    assert_eq!(game.attach_and_confirm(a.clone()).await, Ok(true));
    assert_eq!(game.attach_and_confirm(a.clone()).await, Ok(true));
    assert_eq!(game.attach_and_confirm(b.clone()).await, Ok(false));
    assert_eq!(game.player_count(), 1);
    assert_eq!(game.phase(), GamePhase::Forming);

    game.cancel();
    game.terminated().await;
    assert!(!a.is_bound());
    assert_eq!(game.attach_and_confirm(a).await, Err(GameError::Closed(game.id())));
}

#[tokio::test(start_paused = true)]
async fn test_spawn_repairs_zero_timings() {
    let config = GameConfig {
        countdown: Duration::from_secs(2),
        ready_countdown: Duration::from_secs(1),
        tick_interval: Duration::ZERO,
        countdown_step: Duration::ZERO,
        ..GameConfig::default()
    };
    let (game, (_a, mut a_rx), _b) = paired(config, RoundPolicy::Default).await;

    assert_eq!(game.config().tick_interval, GameConfig::default().tick_interval);
    assert_eq!(game.config().countdown_step, Duration::from_secs(1));
    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(1));
    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(0));
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));
    game.cancel();
}

// =========================================================================
// Countdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_second_attach_confirms_and_counts_down_to_active() {
    let (game, (a, mut a_rx), (b, mut b_rx)) =
        paired(GameConfig::default(), RoundPolicy::Default).await;
    assert_eq!(game.phase(), GamePhase::CountingDown);
    assert_eq!(a.status(), ClientStatus::Confirming);
    assert_eq!(b.status(), ClientStatus::Confirming);

    for secs in (0..30).rev() {
        assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(secs));
        assert_eq!(next(&mut b_rx).await, Response::SecsRoundStart(secs));
    }

    let Response::GameState(snapshot) = next(&mut a_rx).await else {
        panic!("expected initial game_state");
    };
    assert_eq!(snapshot.game_id, game.id());
    assert_eq!(snapshot.seed, game.seed());
    assert!(snapshot.start_time > 0);
    assert_eq!(snapshot.players.len(), 2);

    assert_eq!(game.phase(), GamePhase::Active);
    assert_eq!(a.status(), ClientStatus::InGame);
    assert_eq!(b.status(), ClientStatus::InGame);
    game.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_countdown_clamps_to_ready_threshold_once_all_ready() {
    let (game, (a, mut a_rx), (b, mut b_rx)) =
        paired(GameConfig::default(), RoundPolicy::Default).await;

    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(29));
    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(28));

    assert!(a.transition_status(ClientStatus::Confirming, ClientStatus::Ready));
    assert!(b.transition_status(ClientStatus::Confirming, ClientStatus::Ready));

    let mut remaining = Vec::new();
    loop {
        match next(&mut a_rx).await {
            Response::SecsRoundStart(secs) => remaining.push(secs),
            Response::GameState(_) => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    assert_eq!(game.phase(), GamePhase::Active);

    // b saw the same sequence.
    let mut b_secs = Vec::new();
    while let Ok(Response::SecsRoundStart(secs)) = b_rx.try_recv() {
        b_secs.push(secs);
    }
    assert_eq!(b_secs, vec![29, 28, 4, 3, 2, 1, 0]);
    game.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_one_ready_player_does_not_shorten_countdown() {
    let (game, (a, mut a_rx), _b) = paired(GameConfig::default(), RoundPolicy::Default).await;
    a.set_status(ClientStatus::Ready);

    for secs in [29, 28, 27] {
        assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(secs));
    }
    game.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_orphan_during_countdown_sends_one_cancel_and_nothing_after() {
    let (game, (a, mut a_rx), (b, mut b_rx)) =
        paired(GameConfig::default(), RoundPolicy::Default).await;
    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(29));
    assert_eq!(next(&mut b_rx).await, Response::SecsRoundStart(29));

    // What connection cleanup does.
    b.cancel();
    assert!(game.try_detach(b.clone()));

    assert_eq!(next(&mut a_rx).await, Response::GameCancelled);
    wait_terminated(&game).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(a_rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(b_rx.try_recv(), Err(TryRecvError::Empty)));

    assert!(!a.is_bound());
    assert!(!b.is_bound());
    assert_eq!(a.status(), ClientStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_attach_during_countdown_is_rejected() {
    let (game, _a, _b) = paired(GameConfig::default(), RoundPolicy::Default).await;
    let (c, mut c_rx) = client("carol", 8);

    game.attach(c.clone()).await.unwrap();

    assert_eq!(next(&mut c_rx).await, Response::JoinRunningGameRejected);
    assert!(!c.is_bound());
    assert_eq!(game.player_count(), 2);
    game.cancel();
}

// =========================================================================
// Eviction
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_is_evicted_without_starving_the_other() {
    let game = spawn_game_with_policy(GameMode::Race, GameConfig::default(), RoundPolicy::Default);
    let (fast, mut fast_rx) = client("fast", 256);
    let (slow, mut slow_rx) = client("slow", 1);
    game.attach(fast.clone()).await.unwrap();
    game.attach(slow.clone()).await.unwrap();

    let confirmed = Response::GameConfirmed { game_id: game.id() };
    assert_eq!(next(&mut fast_rx).await, confirmed);
    // The slow client never reads; its single slot now holds the confirm.

    assert_eq!(next(&mut fast_rx).await, Response::SecsRoundStart(29));
    assert_eq!(next(&mut fast_rx).await, Response::GameCancelled);
    wait_terminated(&game).await;

    assert!(!slow.is_bound());
    assert_eq!(slow.status(), ClientStatus::Idle);
    assert_eq!(slow_rx.try_recv().ok(), Some(confirmed));
    assert!(matches!(slow_rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_closed_client_is_evicted_on_next_broadcast() {
    let (game, (_a, mut a_rx), (b, _b_rx)) =
        paired(GameConfig::default(), RoundPolicy::Default).await;

    // Cancelled but the detach request never arrived.
    b.cancel();

    assert_eq!(next(&mut a_rx).await, Response::SecsRoundStart(29));
    assert_eq!(next(&mut a_rx).await, Response::GameCancelled);
    wait_terminated(&game).await;
}

// =========================================================================
// Rounds
// =========================================================================

fn quick_config() -> GameConfig {
    GameConfig {
        countdown: Duration::from_secs(2),
        ready_countdown: Duration::from_secs(1),
        tick_interval: Duration::from_secs(1),
        sprint_round_length: Duration::from_secs(3),
        race_level_target: 4,
        ..GameConfig::default()
    }
}

async fn skip_countdown(rx: &mut mpsc::Receiver<Response>) {
    assert_eq!(next(rx).await, Response::SecsRoundStart(1));
    assert_eq!(next(rx).await, Response::SecsRoundStart(0));
}

#[tokio::test(start_paused = true)]
async fn test_sprint_round_ends_with_result_after_round_length() {
    let config = quick_config();
    let policy = RoundPolicy::for_mode(GameMode::Sprint, &config);
    let (game, (a, mut a_rx), (b, mut b_rx)) = paired(config, policy).await;
    skip_countdown(&mut a_rx).await;

    let mut snapshots = 0;
    let result = loop {
        match next(&mut a_rx).await {
            Response::GameState(_) => snapshots += 1,
            Response::RoundResult(result) => break result,
            other => panic!("unexpected {other:?}"),
        }
    };
    assert!((2..=4).contains(&snapshots), "got {snapshots} snapshots");
    assert_eq!(result.len(), 2);

    wait_terminated(&game).await;
    assert_eq!(a.status(), ClientStatus::Ended);
    assert_eq!(b.status(), ClientStatus::Ended);
    assert!(!a.is_bound());

    // b got the same final frame.
    let mut last = None;
    while let Ok(frame) = b_rx.try_recv() {
        last = Some(frame);
    }
    assert!(matches!(last, Some(Response::RoundResult(_))));
}

#[tokio::test(start_paused = true)]
async fn test_race_round_ends_when_level_target_exceeded() {
    let config = quick_config();
    let policy = RoundPolicy::for_mode(GameMode::Race, &config);
    let (game, (a, mut a_rx), (b, _b_rx)) = paired(config, policy).await;
    skip_countdown(&mut a_rx).await;
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));

    // Reaching the target is not enough; it must be exceeded.
    assert!(game.apply_update(b.id(), &update(4)));
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));

    assert!(game.apply_update(a.id(), &update(5)));
    let result = loop {
        match next(&mut a_rx).await {
            Response::GameState(_) => continue,
            Response::RoundResult(result) => break result,
            other => panic!("unexpected {other:?}"),
        }
    };

    let ranking: Vec<(&str, i32)> = result.iter().map(|s| (s.username.as_str(), s.level)).collect();
    assert_eq!(ranking, vec![("alice", 5), ("bob", 4)]);
    wait_terminated(&game).await;
}

#[tokio::test(start_paused = true)]
async fn test_update_before_round_starts_is_ignored() {
    let config = quick_config();
    let policy = RoundPolicy::for_mode(GameMode::Race, &config);
    let (game, (a, mut a_rx), _b) = paired(config, policy).await;

    // Well past the level target, sent while still counting down.
    assert!(!game.apply_update(a.id(), &update(9)));
    skip_countdown(&mut a_rx).await;

    let Response::GameState(snapshot) = next(&mut a_rx).await else {
        panic!("expected initial game_state");
    };
    let me = snapshot.players.iter().find(|p| p.id == a.id()).unwrap();
    assert_ne!(me.level, 9);
    assert_eq!(game.state().max_level(), 0);

    // The first tick keeps the race going.
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));
    assert_eq!(game.phase(), GamePhase::Active);
    game.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_player_update_shows_up_in_next_snapshot() {
    let config = quick_config();
    let (game, (a, mut a_rx), _b) = paired(config, RoundPolicy::Default).await;
    skip_countdown(&mut a_rx).await;
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));

    assert!(game.apply_update(a.id(), &update(3)));
    let Response::GameState(snapshot) = next(&mut a_rx).await else {
        panic!("expected game_state");
    };
    let me = snapshot.players.iter().find(|p| p.id == a.id()).unwrap();
    assert_eq!(me.level, 3);
    assert_eq!(me.position, Position::new(10.0, 20.0));
    assert_eq!(me.rotation, 90.0);
    assert_eq!(game.state().max_level(), 3);
    game.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_detach_during_round_cancels_game() {
    let config = quick_config();
    let (game, (a, mut a_rx), (b, _b_rx)) = paired(config, RoundPolicy::Default).await;
    skip_countdown(&mut a_rx).await;
    assert!(matches!(next(&mut a_rx).await, Response::GameState(_)));

    assert!(game.try_detach(b.clone()));
    loop {
        match next(&mut a_rx).await {
            Response::GameState(_) => continue,
            Response::GameCancelled => break,
            other => panic!("unexpected {other:?}"),
        }
    }
    wait_terminated(&game).await;
    assert_eq!(a.status(), ClientStatus::Idle);
    assert_eq!(b.status(), ClientStatus::Idle);
}
