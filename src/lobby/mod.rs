//! Lobby State Machine
//!
//! Authoritative in-memory state for matchmaking and duels.
//!
//! ## Module Structure
//!
//! - `registry`: who is logged in and where they stand
//! - `rooms`: live duels
//! - `challenge`: propose / accept / reject / expire negotiation
//! - `duel`: piece submission, resolution, mutual reset
//! - `liveness`: ping sweep, eviction, disconnect recovery, room reaping
//!
//! Every transition runs on a [`Lobby`] behind the single lock held by
//! [`SharedLobby`], from the first lookup to the last queued notification.
//! Notifications are queued with `try_send` and never awaited under the lock.

pub mod registry;
pub mod rooms;
pub mod challenge;
pub mod duel;
pub mod liveness;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::piece::Piece;
use crate::network::protocol::{RosterEntry, ServerMessage, WelcomeInfo};

pub use registry::{ConnectionId, Participant, ParticipantStatus, Presence, SessionRegistry};
pub use rooms::{Duel, DuelPhase, RoomId, RoomStore, Side};
pub use challenge::ChallengeTicket;
pub use duel::ResetProgress;
pub use liveness::SweepReport;

/// Name used in notifications for a connection that never logged in.
pub(crate) const UNKNOWN_PLAYER: &str = "Unknown Player";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Lobby timer configuration.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a challenge waits for an answer.
    pub challenge_timeout: Duration,
    /// Liveness sweep period.
    pub ping_interval: Duration,
    /// Silence after which a logged-in connection is evicted.
    pub liveness_timeout: Duration,
    /// Silence after which a connection that never logged in is evicted.
    pub prelogin_timeout: Duration,
    /// Stale-room reaper period.
    pub reap_interval: Duration,
    /// Age after which a room is deleted regardless of phase.
    pub max_room_age: Duration,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            challenge_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(15),
            liveness_timeout: Duration::from_secs(35),
            prelogin_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(300),
            max_room_age: Duration::from_secs(3600),
        }
    }
}

impl LobbyConfig {
    /// Create config from environment variables (whole seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            challenge_timeout: env_secs("CHALLENGE_TIMEOUT_SECS", defaults.challenge_timeout),
            ping_interval: env_secs("PING_INTERVAL_SECS", defaults.ping_interval),
            liveness_timeout: env_secs("LIVENESS_TIMEOUT_SECS", defaults.liveness_timeout),
            prelogin_timeout: env_secs("PRELOGIN_TIMEOUT_SECS", defaults.prelogin_timeout),
            reap_interval: env_secs("ROOM_REAP_INTERVAL_SECS", defaults.reap_interval),
            max_room_age: env_secs("MAX_ROOM_AGE_SECS", defaults.max_room_age),
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                warn!("Ignoring invalid {}={:?}, using {:?}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Lobby errors. All are reported privately to the connection that caused them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// Display name is empty after trimming.
    #[error("Invalid nickname")]
    InvalidName,

    /// Connection already has a display name.
    #[error("Already logged in")]
    AlreadyLoggedIn,

    /// Challenger or target missing, identical, or busy.
    #[error("Player not available")]
    PlayerUnavailable,

    /// The challenge timed out, was withdrawn, or never existed.
    #[error("Challenge is no longer valid (e.g., timed out or status changed)")]
    StaleChallenge,

    /// No such room.
    #[error("Room not found")]
    RoomNotFound,

    /// Caller is not a side of the room.
    #[error("Not a valid player in this room")]
    NotAParticipant,

    /// Both pieces are already in.
    #[error("Game already finished")]
    DuelFinished,

    /// Reset requested before the duel resolved.
    #[error("Game is not finished yet")]
    DuelNotFinished,

    /// Caller already committed a piece.
    #[error("You have already selected a piece")]
    AlreadySubmitted,

    /// Not one of the eleven pieces.
    #[error("Invalid piece: {0}")]
    InvalidPiece(String),
}

// =============================================================================
// LOBBY
// =============================================================================

/// An open connection, logged in or not.
struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    last_seen: Instant,
    kick: Option<oneshot::Sender<()>>,
}

/// Bookkeeping for the challenge a participant has issued.
struct PendingChallenge {
    target: ConnectionId,
    ticket: u64,
    timer: Option<AbortHandle>,
}

impl PendingChallenge {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// All matchmaking state.
pub struct Lobby {
    config: LobbyConfig,
    connections: BTreeMap<ConnectionId, Connection>,
    registry: SessionRegistry,
    rooms: RoomStore,
    /// Pending challenges keyed by challenger.
    pending: BTreeMap<ConnectionId, PendingChallenge>,
    next_ticket: u64,
}

impl Lobby {
    /// Create an empty lobby.
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            connections: BTreeMap::new(),
            registry: SessionRegistry::new(),
            rooms: RoomStore::new(),
            pending: BTreeMap::new(),
            next_ticket: 0,
        }
    }

    /// Timer configuration.
    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Logged-in participants.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Live duels.
    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether a connection is open.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of unanswered challenges.
    pub fn pending_challenges(&self) -> usize {
        self.pending.len()
    }

    /// Track a new connection and greet it with its id.
    ///
    /// Firing `kick` is how the lobby asks the transport to close the socket.
    pub fn connect(
        &mut self,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
        kick: oneshot::Sender<()>,
        now: Instant,
    ) {
        self.connections.insert(id, Connection {
            sender,
            last_seen: now,
            kick: Some(kick),
        });
        self.send(&id, ServerMessage::Welcome(WelcomeInfo {
            connection_id: id,
            server_version: crate::VERSION.to_string(),
        }));
        self.send_roster(&id);
        debug!("Connection {} tracked ({} open)", id, self.connections.len());
    }

    /// Log a connection in.
    pub fn login(&mut self, id: ConnectionId, display_name: &str, now: Instant) -> Result<(), LobbyError> {
        if !self.connections.contains_key(&id) {
            return Err(LobbyError::PlayerUnavailable);
        }
        let participant = self.registry.register(id, display_name, now)?;
        info!("Connection {} logged in as {:?}", id, participant.display_name());
        self.broadcast_roster();
        Ok(())
    }

    /// Record a liveness acknowledgment.
    pub fn pong(&mut self, id: &ConnectionId, now: Instant) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.last_seen = now;
        }
        self.registry.touch(id, now);
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Queue a message for one connection. Never blocks.
    pub(crate) fn send(&self, to: &ConnectionId, message: ServerMessage) {
        let Some(conn) = self.connections.get(to) else {
            debug!("Dropping message for departed connection {}", to);
            return;
        };
        match conn.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Outbound queue full for {}, message dropped", to),
            Err(TrySendError::Closed(_)) => debug!("Outbound queue closed for {}", to),
        }
    }

    /// Queue a message for every connection not in `excluded`.
    pub(crate) fn broadcast_except(&self, excluded: &[ConnectionId], message: &ServerMessage) {
        for id in self.connections.keys() {
            if !excluded.contains(id) {
                self.send(id, message.clone());
            }
        }
    }

    /// Queue a message for every connection.
    pub(crate) fn broadcast(&self, message: &ServerMessage) {
        self.broadcast_except(&[], message);
    }

    /// Send `to` the roster of everyone else.
    fn send_roster(&self, to: &ConnectionId) {
        let roster = self.registry
            .list_others(to)
            .into_iter()
            .map(|p| RosterEntry {
                id: p.id,
                nickname: p.display_name().to_string(),
                status: p.status(),
            })
            .collect();
        self.send(to, ServerMessage::PlayersList(roster));
    }

    /// Send every connection its roster.
    pub(crate) fn broadcast_roster(&self) {
        for id in self.connections.keys() {
            self.send_roster(id);
        }
    }

    /// Display name for notifications.
    pub(crate) fn name_of(&self, id: &ConnectionId) -> String {
        self.registry
            .display_name(id)
            .unwrap_or(UNKNOWN_PLAYER)
            .to_string()
    }
}

// =============================================================================
// SHARED LOBBY
// =============================================================================

/// The coordinating context: one lock around the whole [`Lobby`], plus the
/// timer tasks that feed back into it.
#[derive(Clone)]
pub struct SharedLobby {
    inner: Arc<Mutex<Lobby>>,
}

impl SharedLobby {
    /// Create a new shared lobby.
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lobby::new(config))),
        }
    }

    /// Take the lock for one full transition.
    pub async fn lock(&self) -> MutexGuard<'_, Lobby> {
        self.inner.lock().await
    }

    /// Track a new connection.
    pub async fn connect(
        &self,
        id: ConnectionId,
        sender: mpsc::Sender<ServerMessage>,
        kick: oneshot::Sender<()>,
    ) {
        self.lock().await.connect(id, sender, kick, Instant::now());
    }

    /// Run disconnect recovery. Safe to call more than once.
    pub async fn disconnect(&self, id: &ConnectionId) -> bool {
        self.lock().await.disconnect(id)
    }

    /// Log a connection in.
    pub async fn login(&self, id: ConnectionId, display_name: &str) -> Result<(), LobbyError> {
        self.lock().await.login(id, display_name, Instant::now())
    }

    /// Propose a challenge and arm its expiry timer.
    pub async fn challenge(&self, from: ConnectionId, to: ConnectionId) -> Result<(), LobbyError> {
        let mut lobby = self.lock().await;
        let ticket = lobby.propose_challenge(from, to)?;
        let timer = self.spawn_expiry(ticket, lobby.config().challenge_timeout);
        lobby.arm_challenge_timer(&ticket, timer);
        Ok(())
    }

    /// Accept a challenge.
    pub async fn accept_challenge(&self, accepter: ConnectionId, challenger: ConnectionId) -> Result<RoomId, LobbyError> {
        self.lock().await.accept_challenge(accepter, challenger, Instant::now())
    }

    /// Decline a challenge.
    pub async fn reject_challenge(&self, rejecter: ConnectionId, challenger: ConnectionId) {
        self.lock().await.reject_challenge(rejecter, challenger);
    }

    /// Commit a piece, given by name.
    pub async fn submit_choice(&self, participant: ConnectionId, room: RoomId, piece: &str) -> Result<(), LobbyError> {
        let piece: Piece = piece
            .parse()
            .map_err(|_| LobbyError::InvalidPiece(piece.to_string()))?;
        self.lock().await.submit_choice(participant, room, piece)
    }

    /// Confirm a reset.
    pub async fn confirm_reset(&self, participant: ConnectionId, room: RoomId) -> Result<ResetProgress, LobbyError> {
        self.lock().await.confirm_reset(participant, room)
    }

    /// Record a liveness acknowledgment.
    pub async fn pong(&self, id: &ConnectionId) {
        self.lock().await.pong(id, Instant::now());
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.lock().await.connection_count()
    }

    fn spawn_expiry(&self, ticket: ChallengeTicket, delay: Duration) -> AbortHandle {
        let lobby = self.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            lobby.lock().await.expire_challenge(&ticket);
        })
        .abort_handle()
    }

    /// Start the liveness sweep and the stale-room reaper.
    pub fn spawn_supervisors(&self) -> Vec<JoinHandle<()>> {
        let liveness = self.clone();
        let reaper = self.clone();
        vec![
            tokio::spawn(async move { liveness.run_liveness_loop().await }),
            tokio::spawn(async move { reaper.run_reaper_loop().await }),
        ]
    }

    async fn run_liveness_loop(self) {
        let period = self.lock().await.config().ping_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.lock().await.sweep(Instant::now());
            if !report.evicted.is_empty() {
                info!("Liveness sweep evicted {} connection(s)", report.evicted.len());
            }
        }
    }

    async fn run_reaper_loop(self) {
        let period = self.lock().await.config().reap_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let reaped = self.lock().await.reap_stale_rooms(Instant::now());
            if !reaped.is_empty() {
                info!("Reaped {} stale room(s)", reaped.len());
            }
        }
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// The client end of a test connection.
    pub struct TestClient {
        pub id: ConnectionId,
        pub rx: mpsc::Receiver<ServerMessage>,
        pub kicked: oneshot::Receiver<()>,
    }

    impl TestClient {
        /// Everything queued so far.
        pub fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        /// Drain and keep only messages matching `pred`.
        pub fn drain_matching(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> Vec<ServerMessage> {
            self.drain().into_iter().filter(|m| pred(m)).collect()
        }
    }

    /// Open a connection on `lobby`.
    pub fn connect(lobby: &mut Lobby, now: Instant) -> TestClient {
        let id = ConnectionId::random();
        let (tx, rx) = mpsc::channel(256);
        let (kick_tx, kicked) = oneshot::channel();
        lobby.connect(id, tx, kick_tx, now);
        TestClient { id, rx, kicked }
    }

    /// A lobby with one logged-in client per name, queues drained.
    pub fn lobby_with(names: &[&str]) -> (Lobby, Vec<TestClient>) {
        let mut lobby = Lobby::new(LobbyConfig::default());
        let now = Instant::now();
        let mut clients: Vec<TestClient> = names.iter().map(|_| connect(&mut lobby, now)).collect();
        for (client, name) in clients.iter().zip(names) {
            lobby.login(client.id, name, now).unwrap();
        }
        for client in clients.iter_mut() {
            client.drain();
        }
        (lobby, clients)
    }

    /// Status of a participant.
    pub fn status(lobby: &Lobby, id: &ConnectionId) -> Option<ParticipantStatus> {
        lobby.registry().get(id).map(|p| p.status())
    }
}
