//! WebSocket Lobby Server
//!
//! Async WebSocket server for lobby connections.
//! Decodes client frames, dispatches them to the lobby and streams
//! notifications back.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::lobby::{ConnectionId, LobbyConfig, LobbyError, SharedLobby};
use crate::game::piece::Piece;
use crate::network::protocol::{ClientMessage, ServerMessage};

/// How long a closing connection may take to flush its queue.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound queue size.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3000),
            max_connections: 1000,
            outbound_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Create config from `BIND_HOST`, `PORT` and `MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, GameServerError> {
        let defaults = Self::default();

        let host: IpAddr = match std::env::var("BIND_HOST") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                GameServerError::InvalidConfig(format!("BIND_HOST is not an IP address: {raw:?}"))
            })?,
            Err(_) => defaults.bind_addr.ip(),
        };
        let port: u16 = match std::env::var("PORT") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                GameServerError::InvalidConfig(format!("PORT is not a valid port: {raw:?}"))
            })?,
            Err(_) => defaults.bind_addr.port(),
        };
        let max_connections = match std::env::var("MAX_CONNECTIONS") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                GameServerError::InvalidConfig(format!("MAX_CONNECTIONS is not a number: {raw:?}"))
            })?,
            Err(_) => defaults.max_connections,
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            max_connections,
            ..defaults
        })
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The lobby server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Shared lobby state.
    lobby: SharedLobby,
    /// One permit per open socket, handshakes included.
    slots: Arc<Semaphore>,
    /// Deadline for the WebSocket upgrade.
    handshake_timeout: Duration,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, lobby_config: LobbyConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            slots: Arc::new(Semaphore::new(config.max_connections)),
            handshake_timeout: lobby_config.prelogin_timeout,
            config,
            lobby: SharedLobby::new(lobby_config),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Lobby server listening on {}", listener.local_addr()?);

        let supervisors = self.lobby.spawn_supervisors();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        for handle in supervisors {
            handle.abort();
        }

        Ok(())
    }

    /// Handle a new TCP connection on its own task.
    ///
    /// The slot permit is held until the task ends.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let lobby = self.lobby.clone();
        let buffer = self.config.outbound_buffer;
        let handshake_timeout = self.handshake_timeout;
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let result = Self::serve_connection(lobby, stream, addr, buffer, handshake_timeout, shutdown_rx).await;
            if let Err(e) = result {
                error!("Connection {} failed: {}", addr, e);
            }
        });
    }

    async fn serve_connection(
        lobby: SharedLobby,
        stream: TcpStream,
        addr: SocketAddr,
        buffer: usize,
        handshake_timeout: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        // Dropping the handshake future closes the socket.
        let ws_stream = match timeout(handshake_timeout, accept_async(stream)).await {
            Ok(handshake) => handshake?,
            Err(_) => {
                debug!("Handshake from {} timed out", addr);
                return Ok(());
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(buffer);
        let (kick_tx, mut kick_rx) = oneshot::channel::<()>();

        let id = ConnectionId::random();
        lobby.connect(id, msg_tx.clone(), kick_tx).await;
        info!("Connection {} opened from {}", id, addr);

        // Drains the queue until every sender is gone, then closes the socket.
        let mut writer = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_sender.close().await;
        });

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let reply = match ClientMessage::from_json(&text) {
                                Ok(client_msg) => Self::handle_client_message(&lobby, id, client_msg)
                                    .await
                                    .err()
                                    .map(|e| e.to_string()),
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", id, e);
                                    Some("Invalid message format".to_string())
                                }
                            };
                            if let Some(message) = reply {
                                let _ = msg_tx.send(ServerMessage::Error(message)).await;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!("Binary frame from {}", id);
                            let _ = msg_tx.send(ServerMessage::Error("Invalid message format".to_string())).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", id);
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", id, e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = &mut kick_rx => {
                    debug!("Connection {} kicked", id);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        // Cleanup
        lobby.disconnect(&id).await;
        drop(msg_tx);
        if !Self::stop_writer(&mut writer).await {
            debug!("Writer for {} did not finish in time", id);
        }

        info!("Connection {} closed", id);
        Ok(())
    }

    /// Give the writer `FLUSH_TIMEOUT` to drain, then abort it.
    ///
    /// Returns whether it finished on its own.
    async fn stop_writer(writer: &mut JoinHandle<()>) -> bool {
        if timeout(FLUSH_TIMEOUT, &mut *writer).await.is_ok() {
            return true;
        }
        writer.abort();
        false
    }

    /// Dispatch one decoded client message.
    async fn handle_client_message(
        lobby: &SharedLobby,
        id: ConnectionId,
        msg: ClientMessage,
    ) -> Result<(), LobbyError> {
        match msg {
            ClientMessage::Login(name) => lobby.login(id, &name).await,
            ClientMessage::Challenge(target) => {
                let target = target.parse().map_err(|_| LobbyError::PlayerUnavailable)?;
                lobby.challenge(id, target).await
            }
            ClientMessage::AcceptChallenge(challenger) => {
                let challenger = challenger.parse().map_err(|_| LobbyError::StaleChallenge)?;
                lobby.accept_challenge(id, challenger).await.map(|_| ())
            }
            ClientMessage::RejectChallenge(challenger) => {
                match challenger.parse() {
                    Ok(challenger) => lobby.reject_challenge(id, challenger).await,
                    Err(_) => debug!("Reject from {} names no connection", id),
                }
                Ok(())
            }
            ClientMessage::PieceSelected(selection) => {
                // Piece names are checked before room ids, as in `submit_choice`.
                if selection.piece.parse::<Piece>().is_err() {
                    return Err(LobbyError::InvalidPiece(selection.piece));
                }
                let room = selection.room_id.parse().map_err(|_| LobbyError::RoomNotFound)?;
                lobby.submit_choice(id, room, &selection.piece).await
            }
            ClientMessage::ResetGame(room) => {
                let room = room.parse().map_err(|_| LobbyError::RoomNotFound)?;
                lobby.confirm_reset(id, room).await.map(|_| ())
            }
            ClientMessage::Pong => {
                lobby.pong(&id).await;
                Ok(())
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.lobby.connection_count().await
    }

    /// The shared lobby.
    pub fn lobby(&self) -> &SharedLobby {
        &self.lobby
    }
}
