//! Room Store
//!
//! Owns every duel. Participants only keep the room id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::game::piece::Piece;
use crate::game::rules::{resolve, Resolution};
use crate::lobby::registry::ConnectionId;
use crate::lobby::LobbyError;

/// Unique room identifier, serialized as a UUID string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(Uuid);

impl RoomId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RoomId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// One of the two seats of a duel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// The challenger.
    A,
    /// The accepter.
    B,
}

impl Side {
    #[inline]
    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    /// The opposing seat.
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Duel phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuelPhase {
    /// Waiting for both pieces.
    Selecting,
    /// Both pieces revealed and resolved.
    Resolved,
}

// =============================================================================
// DUEL
// =============================================================================

/// A single-round duel between two participants.
#[derive(Debug, Clone)]
pub struct Duel {
    /// Room identifier.
    pub id: RoomId,
    sides: [ConnectionId; 2],
    choices: [Option<Piece>; 2],
    reset_confirmations: BTreeSet<ConnectionId>,
    phase: DuelPhase,
    resolution: Option<Resolution>,
    /// Creation time, for stale-room reaping.
    pub created_at: Instant,
}

impl Duel {
    fn new(id: RoomId, side_a: ConnectionId, side_b: ConnectionId, now: Instant) -> Self {
        Self {
            id,
            sides: [side_a, side_b],
            choices: [None, None],
            reset_confirmations: BTreeSet::new(),
            phase: DuelPhase::Selecting,
            resolution: None,
            created_at: now,
        }
    }

    /// Connection seated at `side`.
    pub fn participant(&self, side: Side) -> ConnectionId {
        self.sides[side.index()]
    }

    /// Both seats, challenger first.
    pub fn sides(&self) -> [ConnectionId; 2] {
        self.sides
    }

    /// Seat of `id`, if it is a side of this duel.
    pub fn side_of(&self, id: &ConnectionId) -> Option<Side> {
        if self.sides[0] == *id {
            Some(Side::A)
        } else if self.sides[1] == *id {
            Some(Side::B)
        } else {
            None
        }
    }

    /// The other side, if `id` is a side.
    pub fn opponent_of(&self, id: &ConnectionId) -> Option<ConnectionId> {
        self.side_of(id).map(|side| self.participant(side.other()))
    }

    /// Current phase.
    pub fn phase(&self) -> DuelPhase {
        self.phase
    }

    /// Piece committed by `side`.
    pub fn choice(&self, side: Side) -> Option<Piece> {
        self.choices[side.index()]
    }

    /// Number of committed pieces (0..=2).
    pub fn choice_count(&self) -> usize {
        self.choices.iter().filter(|c| c.is_some()).count()
    }

    /// Resolution, once both pieces are in (side A first).
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Commit a piece for `side`.
    ///
    /// Returns the resolution when this was the second piece.
    pub fn record_choice(&mut self, side: Side, piece: Piece) -> Result<Option<Resolution>, LobbyError> {
        if self.phase == DuelPhase::Resolved {
            return Err(LobbyError::DuelFinished);
        }
        let slot = &mut self.choices[side.index()];
        if slot.is_some() {
            return Err(LobbyError::AlreadySubmitted);
        }
        *slot = Some(piece);

        match self.choices {
            [Some(a), Some(b)] => {
                let resolution = resolve(a, b);
                self.phase = DuelPhase::Resolved;
                self.resolution = Some(resolution);
                Ok(Some(resolution))
            }
            _ => Ok(None),
        }
    }

    /// Record that `id` agrees to end the duel.
    ///
    /// Returns true once both sides have agreed. Callers check the phase and
    /// membership first.
    pub fn confirm_reset(&mut self, id: ConnectionId) -> bool {
        self.reset_confirmations.insert(id);
        self.sides.iter().all(|side| self.reset_confirmations.contains(side))
    }

    /// Number of sides that asked for a reset.
    pub fn reset_confirmations(&self) -> usize {
        self.reset_confirmations.len()
    }

    /// Time since creation.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

// =============================================================================
// ROOM STORE
// =============================================================================

/// All live duels.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: BTreeMap<RoomId, Duel>,
}

impl RoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a duel between `side_a` and `side_b`.
    pub fn create(&mut self, side_a: ConnectionId, side_b: ConnectionId, now: Instant) -> RoomId {
        let id = RoomId::random();
        self.rooms.insert(id, Duel::new(id, side_a, side_b, now));
        id
    }

    /// Look up a duel.
    pub fn get(&self, id: &RoomId) -> Option<&Duel> {
        self.rooms.get(id)
    }

    /// Look up a duel mutably.
    pub fn get_mut(&mut self, id: &RoomId) -> Option<&mut Duel> {
        self.rooms.get_mut(id)
    }

    /// Delete a duel.
    pub fn remove(&mut self, id: &RoomId) -> Option<Duel> {
        self.rooms.remove(id)
    }

    /// Rooms older than `max_age`.
    pub fn stale(&self, now: Instant, max_age: Duration) -> Vec<RoomId> {
        self.rooms
            .values()
            .filter(|duel| duel.age(now) > max_age)
            .map(|duel| duel.id)
            .collect()
    }

    /// Number of live duels.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether there are no duels.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
