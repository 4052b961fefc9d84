//! `MazeServer` builder, accept loop and handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mazerace_game::GameConfig;
use mazerace_protocol::{Codec, Envelope, Handshake, JsonCodec, Player, Response};
use mazerace_transport::{Connection, Transport, WebSocketTransport};

use crate::{Client, Matchmaker, MazeError, ServerConfig};

/// Builder for configuring and starting a maze race server.
///
/// ```rust,no_run
/// # async fn start() -> Result<(), mazerace::MazeError> {
/// let server = mazerace::MazeServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MazeServerBuilder {
    config: ServerConfig,
}

impl MazeServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn game_config(mut self, game: GameConfig) -> Self {
        self.config.game = game;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener. Failing to bind is the one fatal error.
    pub async fn build(self) -> Result<MazeServer, MazeError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;
        let matchmaker = Arc::new(Matchmaker::new(config.game.clone()));
        Ok(MazeServer {
            transport,
            matchmaker,
            config,
        })
    }
}

/// A bound server. Call [`run()`](Self::run) to start accepting clients.
pub struct MazeServer {
    transport: WebSocketTransport,
    matchmaker: Arc<Matchmaker>,
    config: ServerConfig,
}

impl MazeServer {
    pub fn builder() -> MazeServerBuilder {
        MazeServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections until the process exits. Each connection gets
    /// its own task for the handshake, then its own pumps.
    pub async fn run(mut self) -> Result<(), MazeError> {
        tracing::info!(addr = ?self.local_addr().ok(), "maze race server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let matchmaker = Arc::clone(&self.matchmaker);
                    let capacity = self.config.outbound_capacity;
                    let timeout = self.config.handshake_timeout;
                    tokio::spawn(async move {
                        let conn_id = conn.id();
                        match handshake(&conn, timeout).await {
                            Ok(player) => {
                                Client::spawn(conn, player, matchmaker, capacity);
                            }
                            Err(e) => {
                                tracing::warn!(%conn_id, error = %e, "handshake failed");
                                if let Err(e) = conn.close().await {
                                    tracing::debug!(%conn_id, error = %e, "close failed");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Reads the `connect` frame, builds the player and confirms with
/// `connected`.
pub async fn handshake<C: Connection>(conn: &C, timeout: Duration) -> Result<Player, MazeError>
where
    MazeError: From<C::Error>,
{
    let data = match tokio::time::timeout(timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(MazeError::HandshakeAborted),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(MazeError::HandshakeTimeout),
    };

    let codec = JsonCodec;
    let envelope: Envelope = codec.decode(&data)?;
    let handshake = Handshake::try_from(envelope)?;
    let player = Player::new(handshake.username, handshake.flag);

    let connected = codec.encode(&Response::Connected { player_id: player.id })?;
    conn.send(&connected).await?;
    tracing::debug!(conn_id = %conn.id(), player_id = %player.id, username = %player.username, "handshake complete");
    Ok(player)
}
