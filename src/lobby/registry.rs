//! Session Registry
//!
//! Maps each logged-in connection to its participant record.
//! Duel cleanup on removal is the caller's job (see `liveness`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::lobby::rooms::RoomId;
use crate::lobby::LobbyError;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Opaque handle of one live connection.
///
/// Serialized as the hyphenated UUID string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Where a participant stands in the matchmaking flow.
///
/// Each transitional state names its counterpart, so a half-finished
/// negotiation can always be traced back to the other side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    /// Free to challenge or be challenged.
    Available,
    /// Waiting for `target` to answer a challenge.
    Challenging {
        /// Participant that was challenged.
        target: ConnectionId,
    },
    /// Holding an unanswered challenge from `challenger`.
    Challenged {
        /// Participant that issued the challenge.
        challenger: ConnectionId,
    },
    /// Playing in `room`.
    InDuel {
        /// The duel this participant is a side of.
        room: RoomId,
    },
}

impl Presence {
    /// Wire status for this presence.
    pub fn status(&self) -> ParticipantStatus {
        match self {
            Presence::Available => ParticipantStatus::Available,
            Presence::Challenging { .. } => ParticipantStatus::Challenging,
            Presence::Challenged { .. } => ParticipantStatus::Challenged,
            Presence::InDuel { .. } => ParticipantStatus::InDuel,
        }
    }

    /// Room id, when in a duel.
    pub fn room(&self) -> Option<RoomId> {
        match self {
            Presence::InDuel { room } => Some(*room),
            _ => None,
        }
    }
}

/// Availability status shown in the roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStatus {
    /// Free to play.
    Available,
    /// Issued a challenge, awaiting an answer.
    Challenging,
    /// Received a challenge, yet to answer.
    Challenged,
    /// Currently a side of a duel.
    InDuel,
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A logged-in connection.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Connection this participant lives on.
    pub id: ConnectionId,
    display_name: String,
    /// Current matchmaking presence.
    pub presence: Presence,
    /// Last time a liveness ping was answered.
    pub last_liveness_ack: Instant,
    joined_seq: u64,
}

impl Participant {
    /// Display name chosen at login.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Wire status.
    pub fn status(&self) -> ParticipantStatus {
        self.presence.status()
    }

    /// Whether the participant can take part in a new challenge.
    pub fn is_available(&self) -> bool {
        self.presence == Presence::Available
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// All logged-in participants, keyed by connection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    participants: BTreeMap<ConnectionId, Participant>,
    next_seq: u64,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a connection in under `display_name`.
    ///
    /// The name is trimmed and must not be empty. A connection logs in once.
    pub fn register(
        &mut self,
        id: ConnectionId,
        display_name: &str,
        now: Instant,
    ) -> Result<&Participant, LobbyError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(LobbyError::InvalidName);
        }
        if self.participants.contains_key(&id) {
            return Err(LobbyError::AlreadyLoggedIn);
        }

        let joined_seq = self.next_seq;
        self.next_seq += 1;

        let participant = self.participants.entry(id).or_insert(Participant {
            id,
            display_name: name.to_string(),
            presence: Presence::Available,
            last_liveness_ack: now,
            joined_seq,
        });
        Ok(participant)
    }

    /// Look up a participant.
    pub fn get(&self, id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Look up a participant mutably.
    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    /// Presence of a participant, if logged in.
    pub fn presence(&self, id: &ConnectionId) -> Option<Presence> {
        self.participants.get(id).map(|p| p.presence)
    }

    /// Display name of a participant, if logged in.
    pub fn display_name(&self, id: &ConnectionId) -> Option<&str> {
        self.participants.get(id).map(|p| p.display_name())
    }

    /// Move `id` back to available if its presence is exactly `expected`.
    ///
    /// Returns whether anything changed.
    pub fn release_if(&mut self, id: &ConnectionId, expected: Presence) -> bool {
        match self.participants.get_mut(id) {
            Some(p) if p.presence == expected => {
                p.presence = Presence::Available;
                true
            }
            _ => false,
        }
    }

    /// Record a liveness acknowledgment.
    pub fn touch(&mut self, id: &ConnectionId, now: Instant) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => {
                p.last_liveness_ack = now;
                true
            }
            None => false,
        }
    }

    /// Remove a participant. Does not touch any duel it was in.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Everyone except `excluding`, in login order.
    pub fn list_others(&self, excluding: &ConnectionId) -> Vec<&Participant> {
        let mut others: Vec<&Participant> = self.participants
            .values()
            .filter(|p| p.id != *excluding)
            .collect();
        others.sort_by_key(|p| p.joined_seq);
        others
    }

    /// Whether a connection is logged in.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.participants.contains_key(id)
    }

    /// Number of logged-in participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody is logged in.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_parses_display_form() {
        let id = ConnectionId::random();
        assert_eq!(id.to_string().parse::<ConnectionId>().unwrap(), id);
        assert!("bob".parse::<ConnectionId>().is_err());
        assert!("".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_register_trims_and_sets_available() {
        let mut registry = SessionRegistry::new();
        let id = ConnectionId::random();

        let participant = registry.register(id, "  Alice ", Instant::now()).unwrap();
        assert_eq!(participant.display_name(), "Alice");
        assert_eq!(participant.status(), ParticipantStatus::Available);
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_register_rejects_blank_name() {
        let mut registry = SessionRegistry::new();
        let id = ConnectionId::random();

        assert_eq!(
            registry.register(id, "   ", Instant::now()).unwrap_err(),
            LobbyError::InvalidName
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_name_is_set_once() {
        let mut registry = SessionRegistry::new();
        let id = ConnectionId::random();
        registry.register(id, "Alice", Instant::now()).unwrap();

        let err = registry.register(id, "Mallory", Instant::now()).unwrap_err();
        assert_eq!(err, LobbyError::AlreadyLoggedIn);
        assert_eq!(registry.display_name(&id), Some("Alice"));
    }

    #[test]
    fn test_list_others_in_login_order() {
        let mut registry = SessionRegistry::new();
        let now = Instant::now();
        let ids: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::random()).collect();
        for (i, id) in ids.iter().enumerate() {
            registry.register(*id, &format!("player{i}"), now).unwrap();
        }

        let names: Vec<&str> = registry.list_others(&ids[1])
            .iter()
            .map(|p| p.display_name())
            .collect();
        assert_eq!(names, vec!["player0", "player2", "player3"]);
    }

    #[test]
    fn test_release_if_only_matching_presence() {
        let mut registry = SessionRegistry::new();
        let a = ConnectionId::random();
        let b = ConnectionId::random();
        let c = ConnectionId::random();
        registry.register(a, "A", Instant::now()).unwrap();
        registry.get_mut(&a).unwrap().presence = Presence::Challenging { target: b };

        assert!(!registry.release_if(&a, Presence::Challenging { target: c }));
        assert_eq!(registry.presence(&a), Some(Presence::Challenging { target: b }));

        assert!(registry.release_if(&a, Presence::Challenging { target: b }));
        assert_eq!(registry.presence(&a), Some(Presence::Available));
    }

    #[test]
    fn test_remove() {
        let mut registry = SessionRegistry::new();
        let id = ConnectionId::random();
        registry.register(id, "Alice", Instant::now()).unwrap();

        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_presence_status_mapping() {
        let other = ConnectionId::random();
        assert_eq!(
            Presence::Challenged { challenger: other }.status(),
            ParticipantStatus::Challenged
        );
        assert_eq!(
            serde_json::to_string(&ParticipantStatus::InDuel).unwrap(),
            "\"in-duel\""
        );
    }
}
