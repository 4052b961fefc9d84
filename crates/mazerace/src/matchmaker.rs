//! Queues, pairing, challenges and session bookkeeping.
//!
//! One [`Matchmaker`] is built per server and shared by every connection.
//! Each mode has its own FIFO queue behind its own mutex. Locks are only
//! held for queue surgery; sessions are spawned and attached after they
//! are released. A popped pair is only final once the session reports
//! both clients bound; otherwise the session is cancelled and whoever is
//! still free goes back to the head of the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use mazerace_game::{ClientHandle, ClientStatus, GameConfig, GameHandle, spawn_game};
use mazerace_protocol::{GameId, GameMode, Response};
use mazerace_registry::Registry;
use parking_lot::{Mutex, MutexGuard};

use crate::MatchError;

/// An open invitation: a forming session waiting for a second player.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub game: GameHandle,
    pub mode: GameMode,
}

type Queue = VecDeque<ClientHandle>;

pub struct Matchmaker {
    config: GameConfig,
    sprint: Mutex<Queue>,
    race: Mutex<Queue>,
    games: Arc<Registry<GameId, GameHandle>>,
    challenges: Arc<Registry<GameId, Challenge>>,
}

impl Matchmaker {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config: config.validated(),
            sprint: Mutex::new(VecDeque::new()),
            race: Mutex::new(VecDeque::new()),
            games: Arc::new(Registry::new()),
            challenges: Arc::new(Registry::new()),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn queue(&self, mode: GameMode) -> &Mutex<Queue> {
        match mode {
            GameMode::Sprint => &self.sprint,
            GameMode::Race => &self.race,
        }
    }

    /// Puts `client` in the `mode` queue and pairs the two oldest entries
    /// once there are two. Returns the id of the session it spawned, if any.
    pub async fn enqueue(&self, client: &ClientHandle, mode: GameMode) -> Result<Option<GameId>, MatchError> {
        self.reject_if_engaged(client)?;
        {
            let (mut queue, mut other) = self.lock_queues(mode);
            // Re-checked under both locks: a pairing may have claimed the
            // client from the other queue since the first look.
            self.reject_if_engaged(client)?;
            other.retain(|queued| queued != client);
            queue.retain(|queued| !queued.is_closed());
            if !queue.contains(client) {
                queue.push_back(client.clone());
            }
            client.set_status(ClientStatus::Queued);
            let _ = client.try_send(Response::QueueJoined { game_mode: mode });
            tracing::info!(player_id = %client.id(), %mode, queued = queue.len(), "client queued");
        }
        Ok(self.pair(mode).await)
    }

    /// Pairs the two oldest clients in the `mode` queue until a session
    /// binds both of them or fewer than two remain.
    async fn pair(&self, mode: GameMode) -> Option<GameId> {
        loop {
            let (first, second) = self.claim_pair(mode)?;
            let game = self.spawn_tracked(mode);
            let game_id = game.id();
            tracing::info!(%game_id, %mode, first = %first.id(), second = %second.id(), "paired players");

            let mut bound = Vec::with_capacity(2);
            for player in [first.clone(), second.clone()] {
                let player_id = player.id();
                match game.attach_and_confirm(player).await {
                    Ok(true) => bound.push(player_id),
                    Ok(false) => tracing::debug!(%game_id, %player_id, "paired client not attached"),
                    Err(e) => tracing::warn!(%game_id, %player_id, error = %e, "attach after pairing failed"),
                }
            }
            if bound.len() == 2 {
                return Some(game_id);
            }

            tracing::info!(%game_id, %mode, attached = bound.len(), "pairing fell through, requeueing");
            game.cancel();
            game.terminated().await;
            self.requeue_front(mode, [second, first]);
        }
    }

    /// Pops the two oldest live clients and marks them as taken, so a
    /// concurrent request from either is refused until the pairing settles.
    fn claim_pair(&self, mode: GameMode) -> Option<(ClientHandle, ClientHandle)> {
        let (mut queue, _other) = self.lock_queues(mode);
        queue.retain(|queued| !queued.is_closed());
        if queue.len() < 2 {
            return None;
        }
        let pair = queue.pop_front().zip(queue.pop_front())?;
        pair.0.set_status(ClientStatus::Confirming);
        pair.1.set_status(ClientStatus::Confirming);
        Some(pair)
    }

    /// Puts the clients of a failed pairing back at the head of the queue,
    /// in their original order. Closed clients and clients that found
    /// another session meanwhile are left out.
    fn requeue_front(&self, mode: GameMode, newest_first: [ClientHandle; 2]) {
        let (mut queue, other) = self.lock_queues(mode);
        for client in newest_first {
            if client.is_bound() {
                continue;
            }
            client.transition_status(ClientStatus::Confirming, ClientStatus::Idle);
            if client.is_closed() || queue.contains(&client) || other.contains(&client) {
                continue;
            }
            if client.transition_status(ClientStatus::Idle, ClientStatus::Queued) {
                tracing::debug!(player_id = %client.id(), %mode, "client requeued");
                queue.push_front(client);
            }
        }
    }

    /// Takes `client` out of whichever queue holds it.
    pub fn dequeue(&self, client: &ClientHandle) -> Result<GameMode, MatchError> {
        for mode in GameMode::ALL {
            let mut queue = self.queue(mode).lock();
            let before = queue.len();
            queue.retain(|queued| queued != client);
            if queue.len() != before {
                tracing::info!(player_id = %client.id(), %mode, "client left queue");
                return Ok(mode);
            }
        }
        Err(MatchError::NotQueued(client.id()))
    }

    /// Opens a session with `client` as its first player and registers it
    /// as a challenge under the session's id.
    pub async fn create_challenge(&self, client: &ClientHandle, mode: GameMode) -> Result<GameId, MatchError> {
        self.reject_if_engaged(client)?;
        self.remove_from_queues(client);

        let game = self.spawn_tracked(mode);
        let challenge_id = game.id();
        if !game.attach_and_confirm(client.clone()).await? {
            game.cancel();
            return Err(MatchError::AlreadyInGame(client.id()));
        }
        self.challenges.set(
            challenge_id,
            Challenge {
                game: game.clone(),
                mode,
            },
        );
        if game.is_closed() {
            // Collected before it was registered.
            self.challenges.delete(&challenge_id);
        }
        client.set_status(ClientStatus::Idle);
        let _ = client.try_send(Response::ChallengeCreated { challenge_id });
        tracing::info!(%challenge_id, %mode, player_id = %client.id(), "challenge created");
        Ok(challenge_id)
    }

    /// Claims an open challenge for `client`. Only one acceptor can win.
    pub async fn accept_challenge(&self, client: &ClientHandle, challenge_id: GameId) -> Result<(), MatchError> {
        self.reject_if_engaged(client)?;

        let Some(challenge) = self.challenges.delete(&challenge_id) else {
            return Err(self.stale(client, challenge_id));
        };
        self.remove_from_queues(client);

        match challenge.game.attach_and_confirm(client.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                // The acceptor was turned away; the invitation stays open.
                if !challenge.game.is_closed() {
                    self.challenges.set(challenge_id, challenge);
                }
                return Err(MatchError::AlreadyInGame(client.id()));
            }
            Err(e) => {
                tracing::debug!(%challenge_id, error = %e, "challenge session already closed");
                return Err(self.stale(client, challenge_id));
            }
        }
        tracing::info!(%challenge_id, mode = %challenge.mode, player_id = %client.id(), "challenge accepted");
        Ok(())
    }

    pub fn queue_len(&self, mode: GameMode) -> usize {
        self.queue(mode).lock().len()
    }

    pub fn is_queued(&self, client: &ClientHandle) -> bool {
        GameMode::ALL
            .into_iter()
            .any(|mode| self.queue(mode).lock().contains(client))
    }

    pub fn game(&self, game_id: GameId) -> Option<GameHandle> {
        self.games.get(&game_id)
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }

    pub fn challenge_count(&self) -> usize {
        self.challenges.len()
    }

    /// Refuses clients that are in a session or held by a pairing in flight.
    fn reject_if_engaged(&self, client: &ClientHandle) -> Result<(), MatchError> {
        if client.is_bound() || client.status() == ClientStatus::Confirming {
            tracing::warn!(player_id = %client.id(), "request from client already in a game");
            let _ = client.try_send(Response::AlreadyInGame);
            return Err(MatchError::AlreadyInGame(client.id()));
        }
        Ok(())
    }

    fn stale(&self, client: &ClientHandle, challenge_id: GameId) -> MatchError {
        tracing::warn!(%challenge_id, player_id = %client.id(), "stale challenge");
        let _ = client.try_send(Response::ChallengeStale { challenge_id });
        MatchError::StaleChallenge(challenge_id)
    }

    fn remove_from_queues(&self, client: &ClientHandle) {
        let (mut queue, mut other) = self.lock_queues(GameMode::Sprint);
        queue.retain(|queued| queued != client);
        other.retain(|queued| queued != client);
    }

    /// Locks both queues, always sprint first, and returns `mode`'s queue
    /// followed by the other one.
    fn lock_queues(&self, mode: GameMode) -> (MutexGuard<'_, Queue>, MutexGuard<'_, Queue>) {
        let sprint = self.sprint.lock();
        let race = self.race.lock();
        match mode {
            GameMode::Sprint => (sprint, race),
            GameMode::Race => (race, sprint),
        }
    }

    /// Spawns a session, registers it, and removes it from both registries
    /// once it terminates.
    fn spawn_tracked(&self, mode: GameMode) -> GameHandle {
        let game = spawn_game(mode, self.config.clone());
        let game_id = game.id();
        self.games.set(game_id, game.clone());

        let games = Arc::clone(&self.games);
        let challenges = Arc::clone(&self.challenges);
        let watched = game.clone();
        tokio::spawn(async move {
            watched.closed().await;
            games.delete(&game_id);
            challenges.delete(&game_id);
            tracing::debug!(%game_id, "game collected");
        });
        game
    }
}

impl std::fmt::Debug for Matchmaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matchmaker")
            .field("sprint_queue", &self.queue_len(GameMode::Sprint))
            .field("race_queue", &self.queue_len(GameMode::Race))
            .field("games", &self.game_count())
            .field("challenges", &self.challenge_count())
            .finish()
    }
}
