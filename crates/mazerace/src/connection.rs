//! Connection actor: read pump, write pump and cleanup for one client.
//!
//! After the handshake every connection runs two tasks that share one
//! [`Client`]:
//!
//!   - the read pump decodes frames into commands and dispatches them to
//!     the matchmaker or the bound session
//!   - the write pump drains the client's outbound queue onto the transport
//!
//! Either pump finishing (peer gone, transport error) runs
//! [`Client::cleanup`], which cancels the other one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mazerace_game::{ClientHandle, ClientStatus, GameError, GameHandle};
use mazerace_protocol::{Codec, Command, Envelope, JsonCodec, Player, PlayerId, Response};
use mazerace_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;

use crate::{MatchError, Matchmaker};

/// A connected, handshaken client.
pub struct Client<C: Connection> {
    conn: C,
    handle: ClientHandle,
    matchmaker: Arc<Matchmaker>,
    codec: JsonCodec,
    cleaned_up: AtomicBool,
}

impl<C: Connection> Client<C> {
    /// Wraps `conn` and starts its read and write pumps.
    pub fn spawn(conn: C, player: Player, matchmaker: Arc<Matchmaker>, capacity: usize) -> Arc<Self> {
        let (handle, outbound) = ClientHandle::new(player, capacity);
        let client = Arc::new(Self {
            conn,
            handle,
            matchmaker,
            codec: JsonCodec,
            cleaned_up: AtomicBool::new(false),
        });
        tracing::info!(
            conn_id = %client.conn_id(),
            player_id = %client.id(),
            username = %client.handle.player().username,
            "client connected"
        );

        tokio::spawn(Arc::clone(&client).read_pump());
        tokio::spawn(Arc::clone(&client).write_pump(outbound));
        client
    }

    pub fn id(&self) -> PlayerId {
        self.handle.id()
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// The handle sessions and queues hold for this client.
    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    pub fn status(&self) -> ClientStatus {
        self.handle.status()
    }

    pub fn set_status(&self, status: ClientStatus) {
        self.handle.set_status(status);
    }

    pub fn bind_session(&self, game: &GameHandle) -> Result<(), GameError> {
        self.handle.try_bind(game)
    }

    /// Resolves once the client has been cleaned up.
    pub async fn closed(&self) {
        self.handle.closed().await
    }

    /// Tears the client down. Safe to call from any task any number of
    /// times; only the first call does the work and returns `true`.
    pub async fn cleanup(&self) -> bool {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return false;
        }
        let player_id = self.id();
        self.handle.cancel();

        match self.matchmaker.dequeue(&self.handle) {
            Ok(_) | Err(MatchError::NotQueued(_)) => {}
            Err(e) => tracing::debug!(%player_id, error = %e, "dequeue during cleanup failed"),
        }
        if let Some(game) = self.handle.take_game() {
            game.try_detach(self.handle.clone());
        }
        self.handle.close_outbound();

        if let Err(e) = self.conn.close().await {
            tracing::debug!(%player_id, error = %e, "close failed");
        }
        tracing::info!(conn_id = %self.conn_id(), %player_id, "client disconnected");
        true
    }

    async fn read_pump(self: Arc<Self>) {
        let cancel = self.handle.cancel_token();
        let player_id = self.id();
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = self.conn.recv() => frame,
            };
            match frame {
                Ok(Some(data)) => self.on_frame(&data).await,
                Ok(None) => {
                    tracing::debug!(%player_id, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::debug!(%player_id, error = %e, "recv failed");
                    break;
                }
            }
        }
        self.cleanup().await;
    }

    async fn write_pump(self: Arc<Self>, mut outbound: mpsc::Receiver<Response>) {
        let cancel = self.handle.cancel_token();
        let player_id = self.id();
        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = outbound.recv() => match next {
                    Some(response) => response,
                    None => break,
                },
            };
            let bytes = match self.codec.encode(&response) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(%player_id, error = %e, "failed to encode response");
                    continue;
                }
            };
            if let Err(e) = self.conn.send(&bytes).await {
                tracing::debug!(%player_id, error = %e, "send failed");
                break;
            }
        }
        self.cleanup().await;
    }

    async fn on_frame(&self, data: &[u8]) {
        let command = self
            .codec
            .decode::<Envelope>(data)
            .and_then(Command::try_from);
        match command {
            Ok(command) => self.dispatch(command).await,
            Err(e) => tracing::warn!(player_id = %self.id(), error = %e, "rejected frame"),
        }
    }

    async fn dispatch(&self, command: Command) {
        let player_id = self.id();
        let message_type = command.message_type();
        tracing::debug!(%player_id, message_type, "command");

        let result = match command {
            Command::JoinQueue { game_mode } => self.matchmaker.enqueue(&self.handle, game_mode).await.map(drop),
            Command::LeaveQueue => self.matchmaker.dequeue(&self.handle).map(|game_mode| {
                self.handle.set_status(ClientStatus::Idle);
                self.reply(Response::QueueLeft { game_mode });
            }),
            Command::PlayerUpdate(update) => {
                match self.handle.game() {
                    Some(game) => {
                        game.apply_update(player_id, &update);
                    }
                    None => tracing::trace!(%player_id, "update while not in a game"),
                }
                Ok(())
            }
            Command::PlayerReady => {
                if self.handle.is_bound()
                    && self.handle.transition_status(ClientStatus::Confirming, ClientStatus::Ready)
                {
                    tracing::info!(%player_id, "player ready");
                } else {
                    tracing::debug!(%player_id, status = %self.status(), "ready ignored");
                }
                Ok(())
            }
            Command::CreateChallenge { game_mode } => {
                self.matchmaker.create_challenge(&self.handle, game_mode).await.map(drop)
            }
            Command::AcceptChallenge { challenge_id } => {
                self.matchmaker.accept_challenge(&self.handle, challenge_id).await
            }
        };

        if let Err(e) = result {
            tracing::warn!(%player_id, message_type, error = %e, "command rejected");
        }
    }

    fn reply(&self, response: Response) {
        if let Err(e) = self.handle.try_send(response) {
            tracing::debug!(player_id = %self.id(), error = %e, "reply dropped");
        }
    }
}
