//! The session-facing half of a connection.
//!
//! A [`ClientHandle`] is what queues, challenges and sessions hold on to.
//! It owns the player profile, the client status, the bounded outbound
//! queue feeding the connection's write pump, the (at most one) bound
//! session and the connection's cancellation token. Cloning is cheap.

use std::fmt;
use std::sync::Arc;

use mazerace_protocol::{GameId, Player, PlayerId, Response};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::{GameError, GameHandle};

/// Default depth of a client's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

/// Where a client is in the queue → game lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Idle,
    Queued,
    Confirming,
    Ready,
    InGame,
    Ended,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Confirming => "confirming",
            Self::Ready => "ready",
            Self::InGame => "in_game",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Why a non-blocking send to a client failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutboundError {
    /// The client is not draining its queue fast enough.
    #[error("outbound queue full")]
    Full,
    /// The write pump is gone.
    #[error("outbound queue closed")]
    Closed,
}

struct ClientInner {
    player: Player,
    status: Mutex<ClientStatus>,
    outbound: Mutex<Option<mpsc::Sender<Response>>>,
    game: Mutex<Option<GameHandle>>,
    cancel: CancellationToken,
}

/// Shared handle to one connected client.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    /// Creates a handle and the receiving end of its outbound queue.
    pub fn new(player: Player, capacity: usize) -> (Self, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(ClientInner {
                player,
                status: Mutex::new(ClientStatus::Idle),
                outbound: Mutex::new(Some(tx)),
                game: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> PlayerId {
        self.inner.player.id
    }

    /// The profile captured at handshake time.
    pub fn player(&self) -> &Player {
        &self.inner.player
    }

    pub fn status(&self) -> ClientStatus {
        *self.inner.status.lock()
    }

    pub fn set_status(&self, status: ClientStatus) {
        *self.inner.status.lock() = status;
    }

    /// Sets `to` only if the current status is `from`.
    pub fn transition_status(&self, from: ClientStatus, to: ClientStatus) -> bool {
        let mut status = self.inner.status.lock();
        if *status == from {
            *status = to;
            true
        } else {
            false
        }
    }

    /// The session this client is bound to, if any.
    pub fn game(&self) -> Option<GameHandle> {
        self.inner.game.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.game.lock().is_some()
    }

    /// Binds the client to `game`.
    ///
    /// Checked under the binding lock so it cannot interleave with
    /// [`take_game`](Self::take_game) during connection cleanup: either
    /// the bind is refused or cleanup sees the new binding.
    pub fn try_bind(&self, game: &GameHandle) -> Result<(), GameError> {
        let mut slot = self.inner.game.lock();
        if self.inner.cancel.is_cancelled() {
            return Err(GameError::ClientClosed(self.id()));
        }
        match slot.as_ref() {
            Some(bound) if bound.id() != game.id() => Err(GameError::AlreadyBound {
                player_id: self.id(),
                game_id: bound.id(),
            }),
            _ => {
                *slot = Some(game.clone());
                Ok(())
            }
        }
    }

    /// Clears the binding if it still points at `game_id`.
    pub fn unbind(&self, game_id: GameId) -> bool {
        let mut slot = self.inner.game.lock();
        if slot.as_ref().is_some_and(|game| game.id() == game_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Removes and returns the binding.
    pub fn take_game(&self) -> Option<GameHandle> {
        self.inner.game.lock().take()
    }

    /// Queues a message without waiting.
    pub fn try_send(&self, response: Response) -> Result<(), OutboundError> {
        let outbound = self.inner.outbound.lock();
        let tx = outbound.as_ref().ok_or(OutboundError::Closed)?;
        tx.try_send(response).map_err(|e| match e {
            TrySendError::Full(_) => OutboundError::Full,
            TrySendError::Closed(_) => OutboundError::Closed,
        })
    }

    /// Drops the outbound sender so the write pump drains and stops.
    /// Returns `true` only for the call that actually closed it.
    pub fn close_outbound(&self) -> bool {
        self.inner.outbound.lock().take().is_some()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the connection behind this handle shuts down.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ClientHandle {}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id())
            .field("username", &self.inner.player.username)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}
