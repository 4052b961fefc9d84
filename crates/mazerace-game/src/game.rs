//! Game session: a handle plus one control-loop task.
//!
//! The control loop is the only writer of the roster, the phase and the
//! player set. Everything else talks to it through channels: connections
//! attach and detach, the countdown and round workers submit broadcasts.
//! Outbound delivery never blocks; a client whose queue is full or
//! closed is evicted after the fan-out that found it.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use mazerace_protocol::{GameId, GameMode, GameSnapshot, PlayerId, PlayerScore, PlayerUpdate, Response};
use mazerace_registry::Registry;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::{ClientHandle, ClientStatus, GameConfig, GameError, GamePhase, GameState, RoundPolicy};
use crate::countdown;

const ATTACH_CHANNEL_SIZE: usize = 1;
const DETACH_CHANNEL_SIZE: usize = 8;
const BROADCAST_CHANNEL_SIZE: usize = 1;

/// A message submitted to the control loop for fan-out.
#[derive(Debug)]
pub(crate) enum Broadcast {
    /// Delivered to every attached client.
    Frame(Response),
    /// Delivered, then the round is over.
    Final(Response),
}

/// A client waiting to be attached, and who to tell whether it bound.
struct AttachRequest {
    client: ClientHandle,
    outcome: Option<oneshot::Sender<bool>>,
}

/// Why a session's control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The session's lifetime was cancelled from outside.
    Cancelled,
    /// Everyone left before the countdown started.
    Abandoned,
    /// Fewer than two players remained during countdown or round.
    Orphaned,
    /// The round policy delivered the final result.
    RoundComplete,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::Orphaned => write!(f, "orphaned"),
            Self::RoundComplete => write!(f, "round complete"),
        }
    }
}

struct Shared {
    id: GameId,
    mode: GameMode,
    config: GameConfig,
    state: GameState,
    roster: Registry<PlayerId, ClientHandle>,
    attach_tx: mpsc::Sender<AttachRequest>,
    detach_tx: mpsc::Sender<ClientHandle>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    cancel: CancellationToken,
    phase: watch::Sender<GamePhase>,
}

/// Handle to a running session. Cheap to clone.
#[derive(Clone)]
pub struct GameHandle {
    shared: Arc<Shared>,
}

impl GameHandle {
    pub fn id(&self) -> GameId {
        self.shared.id
    }

    pub fn mode(&self) -> GameMode {
        self.shared.mode
    }

    pub fn config(&self) -> &GameConfig {
        &self.shared.config
    }

    pub fn state(&self) -> &GameState {
        &self.shared.state
    }

    pub fn seed(&self) -> u32 {
        self.shared.state.seed()
    }

    pub fn phase(&self) -> GamePhase {
        *self.shared.phase.borrow()
    }

    /// Watches phase changes; the last value published is `Terminated`.
    pub fn subscribe_phase(&self) -> watch::Receiver<GamePhase> {
        self.shared.phase.subscribe()
    }

    /// Number of attached clients.
    pub fn player_count(&self) -> usize {
        self.shared.roster.len()
    }

    pub fn clients(&self) -> Vec<ClientHandle> {
        self.shared.roster.values()
    }

    pub fn has_client(&self, player_id: PlayerId) -> bool {
        self.shared.roster.contains(&player_id)
    }

    /// Asks the control loop to attach `client`.
    ///
    /// Succeeds once the request is queued; the outcome (bound, rejected
    /// as running, rejected as already in a game) reaches the client as a
    /// response. Fails only if the session has terminated.
    pub async fn attach(&self, client: ClientHandle) -> Result<(), GameError> {
        self.request_attach(AttachRequest { client, outcome: None }).await
    }

    /// Like [`attach`](Self::attach), but waits for the control loop's
    /// verdict. `Ok(true)` means the client is now bound to this session;
    /// `Ok(false)` means it was turned away (closed, bound elsewhere, or
    /// the session was already running).
    pub async fn attach_and_confirm(&self, client: ClientHandle) -> Result<bool, GameError> {
        let (tx, rx) = oneshot::channel();
        self.request_attach(AttachRequest { client, outcome: Some(tx) }).await?;
        // Dropped unanswered only when the session terminated first.
        rx.await.map_err(|_| GameError::Closed(self.id()))
    }

    async fn request_attach(&self, request: AttachRequest) -> Result<(), GameError> {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(GameError::Closed(self.id())),
            sent = self.shared.attach_tx.send(request) => {
                sent.map_err(|_| GameError::Closed(self.id()))
            }
        }
    }

    /// Asks the control loop to drop `client` without waiting.
    ///
    /// Best effort: if the session is gone or its detach queue is full the
    /// request is discarded. A client left behind this way is closed, so
    /// the next fan-out evicts it.
    pub fn try_detach(&self, client: ClientHandle) -> bool {
        if self.shared.cancel.is_cancelled() {
            return false;
        }
        match self.shared.detach_tx.try_send(client) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(game_id = %self.id(), error = %e, "detach request discarded");
                false
            }
        }
    }

    /// Records a player's reported level, position and rotation.
    ///
    /// Only updates sent while the round is active count; anything earlier
    /// would leak into the race's end condition. Returns `false` when the
    /// update was ignored.
    pub fn apply_update(&self, player_id: PlayerId, update: &PlayerUpdate) -> bool {
        if self.phase() != GamePhase::Active {
            tracing::trace!(game_id = %self.id(), %player_id, phase = %self.phase(), "update outside round ignored");
            return false;
        }
        self.shared.state.apply_update(player_id, update)
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.shared.state.snapshot(self.shared.id)
    }

    pub fn round_result(&self) -> Vec<PlayerScore> {
        self.shared.state.round_result()
    }

    /// Ends the session. The control loop tears down on its next turn.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the session's lifetime is over.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    /// Resolves once teardown has finished and every client is unbound.
    pub async fn terminated(&self) {
        let mut phase = self.subscribe_phase();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = phase.wait_for(GamePhase::is_terminated).await;
    }

    /// `true` when every attached client has sent `player_ready`.
    pub(crate) fn all_ready(&self) -> bool {
        let clients = self.shared.roster.values();
        !clients.is_empty() && clients.iter().all(|c| c.status() == ClientStatus::Ready)
    }

    /// Hands a broadcast to the control loop. Returns `false` once the
    /// session is closed.
    pub(crate) async fn submit(&self, broadcast: Broadcast) -> bool {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => false,
            sent = self.shared.broadcast_tx.send(broadcast) => sent.is_ok(),
        }
    }
}

impl fmt::Debug for GameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameHandle")
            .field("id", &self.shared.id)
            .field("mode", &self.shared.mode)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Spawns a session with the round policy that belongs to `mode`.
pub fn spawn_game(mode: GameMode, config: GameConfig) -> GameHandle {
    let config = config.validated();
    let policy = RoundPolicy::for_mode(mode, &config);
    spawn_game_with_policy(mode, config, policy)
}

/// Spawns a session driven by an explicit round policy.
pub fn spawn_game_with_policy(mode: GameMode, config: GameConfig, policy: RoundPolicy) -> GameHandle {
    let config = config.validated();
    let (attach_tx, attach_rx) = mpsc::channel(ATTACH_CHANNEL_SIZE);
    let (detach_tx, detach_rx) = mpsc::channel(DETACH_CHANNEL_SIZE);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CHANNEL_SIZE);
    let (phase, _) = watch::channel(GamePhase::Forming);

    let handle = GameHandle {
        shared: Arc::new(Shared {
            id: GameId::new(),
            mode,
            config,
            state: GameState::new(rand::random()),
            roster: Registry::new(),
            attach_tx,
            detach_tx,
            broadcast_tx,
            cancel: CancellationToken::new(),
            phase,
        }),
    };

    let actor = GameActor {
        game: handle.clone(),
        policy,
        attach_rx,
        detach_rx,
        broadcast_rx,
        countdown_done: None,
    };
    tokio::spawn(actor.run());

    handle
}

struct GameActor {
    game: GameHandle,
    policy: RoundPolicy,
    attach_rx: mpsc::Receiver<AttachRequest>,
    detach_rx: mpsc::Receiver<ClientHandle>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    countdown_done: Option<oneshot::Receiver<()>>,
}

/// Pending forever while no countdown is running.
async fn countdown_finished(
    done: &mut Option<oneshot::Receiver<()>>,
) -> Result<(), oneshot::error::RecvError> {
    match done {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

impl GameActor {
    async fn run(mut self) {
        let game_id = self.game.id();
        let cancel = self.game.shared.cancel.clone();
        tracing::info!(%game_id, mode = %self.game.mode(), "game started");

        let termination = loop {
            let flow = tokio::select! {
                biased;
                _ = cancel.cancelled() => ControlFlow::Break(Termination::Cancelled),
                Some(client) = self.detach_rx.recv() => self.on_detach(client),
                Some(request) = self.attach_rx.recv() => self.on_attach(request),
                done = countdown_finished(&mut self.countdown_done) => {
                    self.countdown_done = None;
                    match done {
                        Ok(()) => self.on_countdown_complete(),
                        Err(_) => ControlFlow::Continue(()),
                    }
                }
                Some(broadcast) = self.broadcast_rx.recv() => self.on_broadcast(broadcast),
            };
            if let ControlFlow::Break(termination) = flow {
                break termination;
            }
        };

        self.teardown(termination);
    }

    fn phase(&self) -> GamePhase {
        self.game.phase()
    }

    fn set_phase(&self, phase: GamePhase) {
        let from = self.phase();
        debug_assert!(from.can_transition_to(phase), "{from} -> {phase}");
        self.game.shared.phase.send_replace(phase);
        tracing::info!(game_id = %self.game.id(), %from, to = %phase, "phase changed");
    }

    fn on_attach(&mut self, request: AttachRequest) -> ControlFlow<Termination> {
        let AttachRequest { client, outcome } = request;
        let bound = self.admit(client);
        if let Some(outcome) = outcome {
            let _ = outcome.send(bound);
        }

        if bound && self.phase().is_joinable() && self.game.player_count() >= 2 {
            return self.start_countdown();
        }
        ControlFlow::Continue(())
    }

    /// Binds and registers `client`. Returns whether it is attached.
    fn admit(&self, client: ClientHandle) -> bool {
        let game_id = self.game.id();
        let player_id = client.id();

        if client.is_closed() {
            tracing::debug!(%game_id, %player_id, "ignoring attach from closed client");
            return false;
        }
        if !self.phase().is_joinable() {
            tracing::warn!(%game_id, %player_id, phase = %self.phase(), "client attempted to join running game");
            let _ = client.try_send(Response::JoinRunningGameRejected);
            return false;
        }
        if self.game.has_client(player_id) {
            return true;
        }
        match client.try_bind(&self.game) {
            Ok(()) => {}
            Err(GameError::AlreadyBound { game_id: other, .. }) => {
                tracing::warn!(%game_id, %player_id, other_game = %other, "client already in a game");
                let _ = client.try_send(Response::AlreadyInGame);
                return false;
            }
            Err(e) => {
                tracing::debug!(%game_id, %player_id, error = %e, "attach refused");
                return false;
            }
        }

        let mut player = client.player().clone();
        player.active = true;
        self.game.shared.state.players().set(player_id, player);
        self.game.shared.roster.set(player_id, client);
        tracing::info!(%game_id, %player_id, players = self.game.player_count(), "player attached");
        true
    }

    fn start_countdown(&mut self) -> ControlFlow<Termination> {
        self.set_phase(GamePhase::CountingDown);
        for client in self.game.clients() {
            client.set_status(ClientStatus::Confirming);
        }
        let failed = self.fan_out(&Response::GameConfirmed { game_id: self.game.id() });

        let (done_tx, done_rx) = oneshot::channel();
        self.countdown_done = Some(done_rx);
        tokio::spawn(countdown::run(self.game.clone(), done_tx));

        self.evict(failed)
    }

    fn on_detach(&mut self, client: ClientHandle) -> ControlFlow<Termination> {
        if self.remove(&client) {
            tracing::info!(
                game_id = %self.game.id(),
                player_id = %client.id(),
                players = self.game.player_count(),
                "player detached"
            );
        } else {
            client.unbind(self.game.id());
        }
        self.check_quorum()
    }

    fn on_countdown_complete(&mut self) -> ControlFlow<Termination> {
        if self.phase() != GamePhase::CountingDown {
            return ControlFlow::Continue(());
        }
        self.set_phase(GamePhase::Active);
        for client in self.game.clients() {
            client.set_status(ClientStatus::InGame);
        }
        tokio::spawn(self.policy.clone().start(self.game.clone()));
        ControlFlow::Continue(())
    }

    fn on_broadcast(&mut self, broadcast: Broadcast) -> ControlFlow<Termination> {
        match broadcast {
            Broadcast::Frame(response) => {
                let failed = self.fan_out(&response);
                self.evict(failed)
            }
            Broadcast::Final(response) => {
                let failed = self.fan_out(&response);
                for client in self.game.clients() {
                    if !failed.contains(&client) {
                        client.set_status(ClientStatus::Ended);
                    }
                }
                ControlFlow::Break(Termination::RoundComplete)
            }
        }
    }

    /// Sends `response` to every attached client and returns the ones that
    /// could not take it.
    fn fan_out(&self, response: &Response) -> Vec<ClientHandle> {
        let mut failed = Vec::new();
        for client in self.game.clients() {
            if client.is_closed() {
                failed.push(client);
                continue;
            }
            match client.try_send(response.clone()) {
                Ok(()) => {
                    tracing::trace!(
                        game_id = %self.game.id(),
                        player_id = %client.id(),
                        message_type = response.message_type(),
                        "sent"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        game_id = %self.game.id(),
                        player_id = %client.id(),
                        error = %e,
                        "delivery failed"
                    );
                    failed.push(client);
                }
            }
        }
        failed
    }

    fn evict(&mut self, failed: Vec<ClientHandle>) -> ControlFlow<Termination> {
        if failed.is_empty() {
            return ControlFlow::Continue(());
        }
        for client in &failed {
            if self.remove(client) {
                tracing::warn!(
                    game_id = %self.game.id(),
                    player_id = %client.id(),
                    "evicted unresponsive client"
                );
            }
        }
        self.check_quorum()
    }

    /// Drops a client from roster and players. Returns `false` if it was
    /// not attached.
    fn remove(&self, client: &ClientHandle) -> bool {
        let player_id = client.id();
        if self.game.shared.roster.delete(&player_id).is_none() {
            return false;
        }
        self.game.shared.state.players().delete(&player_id);
        client.unbind(self.game.id());
        if client.status() != ClientStatus::Ended {
            client.set_status(ClientStatus::Idle);
        }
        true
    }

    fn check_quorum(&self) -> ControlFlow<Termination> {
        let players = self.game.player_count();
        match self.phase() {
            GamePhase::Forming if players == 0 => ControlFlow::Break(Termination::Abandoned),
            phase if phase.is_running() && players < 2 => {
                tracing::info!(game_id = %self.game.id(), %phase, players, "game orphaned, cancelling");
                // Shutting down either way; failures here need no eviction.
                let _ = self.fan_out(&Response::GameCancelled);
                ControlFlow::Break(Termination::Orphaned)
            }
            _ => ControlFlow::Continue(()),
        }
    }

    fn teardown(mut self, termination: Termination) {
        let game_id = self.game.id();
        self.game.shared.cancel.cancel();

        for client in self.game.clients() {
            client.unbind(game_id);
            if client.status() != ClientStatus::Ended {
                client.set_status(ClientStatus::Idle);
            }
        }
        self.game.shared.roster.reset();
        self.game.shared.state.players().reset();

        // Attach requests queued just before the cancel never got a binding.
        // Dropping each request's outcome sender reports the session closed.
        while let Ok(AttachRequest { client, .. }) = self.attach_rx.try_recv() {
            tracing::debug!(%game_id, player_id = %client.id(), "dropping attach to terminated game");
            if !client.is_bound() {
                client.set_status(ClientStatus::Idle);
            }
        }

        self.set_phase(GamePhase::Terminated);
        tracing::info!(%game_id, %termination, "game terminated");
    }
}
