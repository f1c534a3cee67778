//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every text frame is one JSON object: `{"type": "<event>", "data": <payload>}`.
//! Payload-less events omit `data`.

use serde::{Serialize, Deserialize};

use crate::game::piece::Piece;
use crate::game::rules::Outcome;
use crate::lobby::registry::{ConnectionId, ParticipantStatus};
use crate::lobby::rooms::RoomId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Ids arrive as raw strings. One that does not parse is answered with the
/// lobby error for an unknown participant or room, not a format error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Log in with a display name.
    Login(String),

    /// Challenge another participant.
    Challenge(String),

    /// Accept a challenge from the given challenger.
    AcceptChallenge(String),

    /// Decline a challenge from the given challenger.
    RejectChallenge(String),

    /// Commit a piece in a duel.
    PieceSelected(PieceSelection),

    /// Ask to close a finished duel.
    ResetGame(String),

    /// Answer to a liveness ping.
    Pong,
}

/// A piece submission.
///
/// Both fields stay raw strings here so an unknown name or room is reported
/// as a lobby error instead of a malformed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceSelection {
    /// Duel the piece is for.
    pub room_id: String,
    /// Piece name.
    pub piece: String,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome(WelcomeInfo),

    /// A request from this connection failed.
    Error(String),

    /// Everyone else who is logged in.
    PlayersList(Vec<RosterEntry>),

    /// Someone challenged this participant.
    ChallengeReceived(ChallengeReceived),

    /// A challenge this participant issued was declined.
    ChallengeRejected(ChallengeParty),

    /// A pending challenge expired unanswered.
    ChallengeTimeout,

    /// The other party of a pending challenge went away.
    ChallengeCancelled(ChallengeParty),

    /// Duel progress, for sides and spectators alike.
    GameStatusUpdate(GameStatus),

    /// Informational text.
    GameMessage(String),

    /// Liveness check; answer with `pong`.
    Ping,
}

/// Identity handed to a fresh connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeInfo {
    /// This connection's id, as others see it in rosters.
    pub connection_id: ConnectionId,
    /// Server version.
    pub server_version: String,
}

/// One roster row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Connection id to challenge.
    pub id: ConnectionId,
    /// Display name.
    pub nickname: String,
    /// Availability.
    pub status: ParticipantStatus,
}

/// Incoming challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeReceived {
    /// Challenger's display name.
    pub from: String,
    /// Challenger's id, to pass back in accept/reject.
    pub challenger_id: ConnectionId,
}

/// The other party of a challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeParty {
    /// Display name.
    pub by: String,
}

/// Duel status notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum GameStatus {
    /// A duel started between two other participants.
    Watching(WatchingInfo),

    /// This participant's duel started.
    Playing(PlayingInfo),

    /// A duel resolved.
    Result(DuelResultView),

    /// The opponent left mid-duel.
    OpponentDisconnected {
        /// Room that was closed.
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    /// A duel was closed; clear any view of it.
    Reset {
        /// Room that was closed.
        #[serde(rename = "roomId")]
        room_id: RoomId,
        /// Why, when not a mutual reset.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Spectator view of a starting duel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchingInfo {
    /// Challenger's name.
    pub player1: String,
    /// Accepter's name.
    pub player2: String,
    /// Room id.
    pub room_id: RoomId,
}

/// A side's view of its starting duel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingInfo {
    /// Always true.
    pub is_player: bool,
    /// Opponent's name.
    pub opponent: String,
    /// Room id.
    pub room_id: RoomId,
}

/// Result as seen by a side or by a spectator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DuelResultView {
    /// Sent privately to each side.
    Player(PlayerResult),
    /// Sent to everyone else.
    Spectator(SpectatorResult),
}

/// Private result for one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    /// Always true.
    pub is_player: bool,
    /// This side's outcome.
    pub your_status: Outcome,
    /// This side's piece.
    pub your_piece: Piece,
    /// Opponent's name.
    pub opponent: String,
    /// Opponent's outcome.
    pub opponent_status: Outcome,
    /// Opponent's piece.
    pub opponent_piece: Piece,
    /// Room id.
    pub room_id: RoomId,
}

/// Public result for spectators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatorResult {
    /// Always false.
    pub is_player: bool,
    /// Challenger's name.
    pub player1: String,
    /// Accepter's name.
    pub player2: String,
    /// Challenger's piece.
    pub player1_piece: Piece,
    /// Accepter's piece.
    pub player2_piece: Piece,
    /// Challenger's outcome.
    pub player1_status: Outcome,
    /// Accepter's outcome.
    pub player2_status: Outcome,
    /// Room id.
    pub room_id: RoomId,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
