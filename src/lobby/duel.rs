//! Duel Engine
//!
//! Piece submission, simultaneous resolution, mutual reset and disconnect
//! abort. Resolution happens inside the transition that records the second
//! piece, so it can only happen once.

use tracing::info;

use crate::game::piece::Piece;
use crate::game::rules::Resolution;
use crate::lobby::registry::{ConnectionId, Presence};
use crate::lobby::rooms::{DuelPhase, RoomId, Side};
use crate::lobby::{Lobby, LobbyError};
use crate::network::protocol::{
    DuelResultView, GameStatus, PlayerResult, ServerMessage, SpectatorResult,
};

const DISCONNECT_REASON: &str = "Game ended due to player disconnect.";

/// Where a duel stands after a reset confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetProgress {
    /// The other side has not confirmed yet.
    Waiting,
    /// Both confirmed; the duel is gone.
    Completed,
}

impl Lobby {
    /// Commit `piece` for `participant` in `room`.
    pub fn submit_choice(&mut self, participant: ConnectionId, room: RoomId, piece: Piece) -> Result<(), LobbyError> {
        let duel = self.rooms.get_mut(&room).ok_or(LobbyError::RoomNotFound)?;
        if duel.phase() == DuelPhase::Resolved {
            return Err(LobbyError::DuelFinished);
        }
        let side = duel.side_of(&participant).ok_or(LobbyError::NotAParticipant)?;
        let resolution = duel.record_choice(side, piece)?;

        let sides = duel.sides();
        let opponent = duel.participant(side.other());
        let pieces = [duel.choice(Side::A), duel.choice(Side::B)];

        match (resolution, pieces) {
            (Some(resolution), [Some(a), Some(b)]) => {
                self.announce_result(room, sides, [a, b], resolution);
            }
            _ => {
                self.send(&opponent, ServerMessage::GameMessage(format!(
                    "{} has selected a piece.",
                    self.name_of(&participant)
                )));
            }
        }
        Ok(())
    }

    fn announce_result(&self, room: RoomId, sides: [ConnectionId; 2], pieces: [Piece; 2], resolution: Resolution) {
        let [a, b] = sides;
        let names = [self.name_of(&a), self.name_of(&b)];
        info!(
            "Duel {} resolved: {} ({}) {:?} vs {} ({}) {:?}",
            room, names[0], pieces[0], resolution.first, names[1], pieces[1], resolution.second
        );

        let private = |you: usize, seen: Resolution| {
            let them = 1 - you;
            ServerMessage::GameStatusUpdate(GameStatus::Result(DuelResultView::Player(PlayerResult {
                is_player: true,
                your_status: seen.first,
                your_piece: pieces[you],
                opponent: names[them].clone(),
                opponent_status: seen.second,
                opponent_piece: pieces[them],
                room_id: room,
            })))
        };
        self.send(&a, private(0, resolution));
        self.send(&b, private(1, resolution.swapped()));

        self.broadcast_except(
            &sides,
            &ServerMessage::GameStatusUpdate(GameStatus::Result(DuelResultView::Spectator(SpectatorResult {
                is_player: false,
                player1: names[0].clone(),
                player2: names[1].clone(),
                player1_piece: pieces[0],
                player2_piece: pieces[1],
                player1_status: resolution.first,
                player2_status: resolution.second,
                room_id: room,
            }))),
        );
    }

    /// Agree to close a resolved duel. The duel closes once both sides agree.
    pub fn confirm_reset(&mut self, participant: ConnectionId, room: RoomId) -> Result<ResetProgress, LobbyError> {
        let duel = self.rooms.get_mut(&room).ok_or(LobbyError::RoomNotFound)?;
        if duel.phase() != DuelPhase::Resolved {
            return Err(LobbyError::DuelNotFinished);
        }
        let opponent = duel.opponent_of(&participant).ok_or(LobbyError::NotAParticipant)?;
        let complete = duel.confirm_reset(participant);

        if !complete {
            let name = self.name_of(&participant);
            self.send(&opponent, ServerMessage::GameMessage(format!(
                "{} wants to reset the game. Click Reset if you agree.",
                name
            )));
            self.send(&participant, ServerMessage::GameMessage(
                "Waiting for opponent to confirm reset...".to_string(),
            ));
            return Ok(ResetProgress::Waiting);
        }

        self.close_room(room, None);
        info!("Duel {} reset by mutual agreement", room);
        self.broadcast_roster();
        Ok(ResetProgress::Completed)
    }

    /// Close `room` because `disconnected` left. Returns false if the room was
    /// already gone.
    pub fn abort_for_disconnect(&mut self, room: RoomId, disconnected: &ConnectionId) -> bool {
        let Some(duel) = self.rooms.remove(&room) else {
            return false;
        };

        let sides = duel.sides();
        for survivor in sides.iter().filter(|id| *id != disconnected) {
            self.registry.release_if(survivor, Presence::InDuel { room });
            self.send(survivor, ServerMessage::GameStatusUpdate(GameStatus::OpponentDisconnected {
                room_id: room,
            }));
        }
        self.broadcast_except(&sides, &ServerMessage::GameStatusUpdate(GameStatus::Reset {
            room_id: room,
            reason: Some(DISCONNECT_REASON.to_string()),
        }));

        info!("Duel {} closed after {} disconnected", room, disconnected);
        true
    }

    /// Delete `room`, free its sides and tell everyone. Returns false if the
    /// room was already gone.
    pub(crate) fn close_room(&mut self, room: RoomId, reason: Option<String>) -> bool {
        let Some(duel) = self.rooms.remove(&room) else {
            return false;
        };
        for side in duel.sides() {
            self.registry.release_if(&side, Presence::InDuel { room });
        }
        self.broadcast(&ServerMessage::GameStatusUpdate(GameStatus::Reset {
            room_id: room,
            reason,
        }));
        true
    }
}
