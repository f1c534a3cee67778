//! Challenge Coordinator
//!
//! Propose / accept / reject / expire. Each pending challenge is keyed by its
//! challenger and carries a ticket, so an expiry timer can tell whether the
//! challenge it was started for is still the one on record.

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::lobby::registry::{ConnectionId, Presence};
use crate::lobby::rooms::RoomId;
use crate::lobby::{Lobby, LobbyError, PendingChallenge};
use crate::network::protocol::{
    ChallengeParty, ChallengeReceived, GameStatus, PlayingInfo, ServerMessage, WatchingInfo,
};

/// Identifies one specific challenge between two participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChallengeTicket {
    /// Who issued the challenge.
    pub challenger: ConnectionId,
    /// Who was challenged.
    pub target: ConnectionId,
    ticket: u64,
}

impl Lobby {
    /// Open a challenge from `from` to `to`.
    ///
    /// Both must be logged in, distinct and available. The caller arms the
    /// expiry timer with [`Lobby::arm_challenge_timer`].
    pub fn propose_challenge(&mut self, from: ConnectionId, to: ConnectionId) -> Result<ChallengeTicket, LobbyError> {
        if from == to {
            return Err(LobbyError::PlayerUnavailable);
        }
        let available = |id: &ConnectionId| {
            self.registry.get(id).map_or(false, |p| p.is_available())
        };
        if !available(&from) || !available(&to) {
            return Err(LobbyError::PlayerUnavailable);
        }

        if let Some(p) = self.registry.get_mut(&from) {
            p.presence = Presence::Challenging { target: to };
        }
        if let Some(p) = self.registry.get_mut(&to) {
            p.presence = Presence::Challenged { challenger: from };
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(from, PendingChallenge {
            target: to,
            ticket,
            timer: None,
        });

        info!("{} challenged {}", from, to);
        self.send(&to, ServerMessage::ChallengeReceived(ChallengeReceived {
            from: self.name_of(&from),
            challenger_id: from,
        }));
        self.broadcast_roster();

        Ok(ChallengeTicket { challenger: from, target: to, ticket })
    }

    /// Attach the expiry timer to its challenge.
    ///
    /// If the challenge is already gone the timer is aborted.
    pub fn arm_challenge_timer(&mut self, ticket: &ChallengeTicket, timer: AbortHandle) {
        match self.pending.get_mut(&ticket.challenger) {
            Some(pending) if pending.ticket == ticket.ticket => pending.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Accept the challenge `challenger` issued to `accepter` and open a duel.
    pub fn accept_challenge(
        &mut self,
        accepter: ConnectionId,
        challenger: ConnectionId,
        now: Instant,
    ) -> Result<RoomId, LobbyError> {
        let consistent = self.registry.presence(&accepter) == Some(Presence::Challenged { challenger })
            && self.registry.presence(&challenger) == Some(Presence::Challenging { target: accepter });

        if !consistent {
            debug!("Stale accept from {} for challenger {}", accepter, challenger);
            self.dissolve_challenge(challenger, accepter);
            self.broadcast_roster();
            return Err(LobbyError::StaleChallenge);
        }

        if let Some(mut pending) = self.pending.remove(&challenger) {
            pending.cancel_timer();
        }

        let room = self.rooms.create(challenger, accepter, now);
        for id in [challenger, accepter] {
            if let Some(p) = self.registry.get_mut(&id) {
                p.presence = Presence::InDuel { room };
            }
        }

        let challenger_name = self.name_of(&challenger);
        let accepter_name = self.name_of(&accepter);
        info!("Duel {} started: {} vs {}", room, challenger_name, accepter_name);

        self.send(&challenger, ServerMessage::GameStatusUpdate(GameStatus::Playing(PlayingInfo {
            is_player: true,
            opponent: accepter_name.clone(),
            room_id: room,
        })));
        self.send(&accepter, ServerMessage::GameStatusUpdate(GameStatus::Playing(PlayingInfo {
            is_player: true,
            opponent: challenger_name.clone(),
            room_id: room,
        })));
        self.broadcast_except(
            &[challenger, accepter],
            &ServerMessage::GameStatusUpdate(GameStatus::Watching(WatchingInfo {
                player1: challenger_name,
                player2: accepter_name,
                room_id: room,
            })),
        );
        self.broadcast_roster();

        Ok(room)
    }

    /// Decline the challenge `challenger` issued to `rejecter`. Never fails.
    ///
    /// The challenger is only told when something was actually dissolved, so a
    /// reject from an unrelated participant or after expiry changes nothing.
    pub fn reject_challenge(&mut self, rejecter: ConnectionId, challenger: ConnectionId) {
        if !self.dissolve_challenge(challenger, rejecter) {
            debug!("Reject from {} matches no challenge by {}", rejecter, challenger);
            return;
        }
        info!("{} rejected challenge from {}", rejecter, challenger);

        self.send(&challenger, ServerMessage::ChallengeRejected(ChallengeParty {
            by: self.name_of(&rejecter),
        }));
        self.broadcast_roster();
    }

    /// Timer callback. Returns false when the challenge was already settled.
    pub fn expire_challenge(&mut self, ticket: &ChallengeTicket) -> bool {
        let current = self.pending
            .get(&ticket.challenger)
            .map_or(false, |p| p.ticket == ticket.ticket);
        if !current {
            debug!("Expiry for {} -> {} is stale, ignoring", ticket.challenger, ticket.target);
            return false;
        }

        // The firing task is the timer itself; drop its handle without aborting.
        self.pending.remove(&ticket.challenger);
        self.registry.release_if(&ticket.challenger, Presence::Challenging { target: ticket.target });
        self.registry.release_if(&ticket.target, Presence::Challenged { challenger: ticket.challenger });

        info!("Challenge {} -> {} timed out", ticket.challenger, ticket.target);
        self.send(&ticket.challenger, ServerMessage::ChallengeTimeout);
        self.send(&ticket.target, ServerMessage::ChallengeTimeout);
        self.broadcast_roster();
        true
    }

    /// Remove whatever is left of the challenge `challenger` -> `target`.
    ///
    /// Only halves that still point at each other are released. Returns
    /// whether anything changed.
    pub(crate) fn dissolve_challenge(&mut self, challenger: ConnectionId, target: ConnectionId) -> bool {
        let mut changed = false;

        if self.pending.get(&challenger).map_or(false, |p| p.target == target) {
            if let Some(mut pending) = self.pending.remove(&challenger) {
                pending.cancel_timer();
            }
            changed = true;
        }
        changed |= self.registry.release_if(&challenger, Presence::Challenging { target });
        changed |= self.registry.release_if(&target, Presence::Challenged { challenger });
        changed
    }

    /// Drop any challenge `id` takes part in and tell the other side.
    pub(crate) fn abandon_challenges(&mut self, id: &ConnectionId) {
        let counterpart = match self.registry.presence(id) {
            Some(Presence::Challenging { target }) => {
                self.dissolve_challenge(*id, target).then_some(target)
            }
            Some(Presence::Challenged { challenger }) => {
                self.dissolve_challenge(challenger, *id).then_some(challenger)
            }
            _ => None,
        };

        if let Some(mut pending) = self.pending.remove(id) {
            pending.cancel_timer();
        }

        if let Some(other) = counterpart {
            info!("Challenge between {} and {} cancelled by disconnect", id, other);
            self.send(&other, ServerMessage::ChallengeCancelled(ChallengeParty {
                by: self.name_of(id),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time::sleep;

    use super::*;
    use crate::lobby::testing::*;
    use crate::lobby::{LobbyConfig, ParticipantStatus, SharedLobby};

    fn is_timeout(msg: &ServerMessage) -> bool {
        matches!(msg, ServerMessage::ChallengeTimeout)
    }

    #[tokio::test]
    async fn test_propose_challenge() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob"]);
        let (alice, bob) = (clients[0].id, clients[1].id);

        let ticket = lobby.propose_challenge(alice, bob).unwrap();
        assert_eq!(ticket.challenger, alice);
        assert_eq!(ticket.target, bob);
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Challenging));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Challenged));

        let received = clients[1].drain_matching(|m| matches!(m, ServerMessage::ChallengeReceived(_)));
        assert!(matches!(
            received.as_slice(),
            [ServerMessage::ChallengeReceived(c)] if c.from == "Alice" && c.challenger_id == alice
        ));
    }

    #[tokio::test]
    async fn test_challenge_requires_available_distinct_participants() {
        let (mut lobby, clients) = lobby_with(&["Alice", "Bob", "Carol"]);
        let (alice, bob, carol) = (clients[0].id, clients[1].id, clients[2].id);

        assert_eq!(lobby.propose_challenge(alice, alice), Err(LobbyError::PlayerUnavailable));
        assert_eq!(
            lobby.propose_challenge(alice, ConnectionId::random()),
            Err(LobbyError::PlayerUnavailable)
        );

        lobby.propose_challenge(alice, bob).unwrap();
        assert_eq!(lobby.propose_challenge(carol, bob), Err(LobbyError::PlayerUnavailable));
        assert_eq!(lobby.propose_challenge(alice, carol), Err(LobbyError::PlayerUnavailable));
        assert_eq!(status(&lobby, &carol), Some(ParticipantStatus::Available));
    }

    #[tokio::test]
    async fn test_accept_opens_duel() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob", "Carol"]);
        let (alice, bob) = (clients[0].id, clients[1].id);
        lobby.propose_challenge(alice, bob).unwrap();

        let room = lobby.accept_challenge(bob, alice, Instant::now()).unwrap();
        assert_eq!(lobby.rooms().get(&room).unwrap().sides(), [alice, bob]);
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::InDuel));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::InDuel));
        assert_eq!(lobby.pending_challenges(), 0);

        let playing = clients[0].drain_matching(|m| matches!(m, ServerMessage::GameStatusUpdate(_)));
        assert!(matches!(
            playing.as_slice(),
            [ServerMessage::GameStatusUpdate(GameStatus::Playing(p))] if p.opponent == "Bob" && p.room_id == room
        ));

        let watching = clients[2].drain_matching(|m| matches!(m, ServerMessage::GameStatusUpdate(_)));
        assert!(matches!(
            watching.as_slice(),
            [ServerMessage::GameStatusUpdate(GameStatus::Watching(w))]
                if w.player1 == "Alice" && w.player2 == "Bob" && w.room_id == room
        ));
    }

    #[tokio::test]
    async fn test_reject_frees_both() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob"]);
        let (alice, bob) = (clients[0].id, clients[1].id);
        lobby.propose_challenge(alice, bob).unwrap();

        lobby.reject_challenge(bob, alice);
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Available));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Available));
        assert_eq!(lobby.pending_challenges(), 0);

        let rejected = clients[0].drain_matching(|m| matches!(m, ServerMessage::ChallengeRejected(_)));
        assert!(matches!(rejected.as_slice(), [ServerMessage::ChallengeRejected(r)] if r.by == "Bob"));
    }

    #[tokio::test]
    async fn test_reject_from_bystander_changes_nothing() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob", "Carol"]);
        let (alice, bob, carol) = (clients[0].id, clients[1].id, clients[2].id);
        lobby.propose_challenge(alice, bob).unwrap();
        clients[0].drain();

        lobby.reject_challenge(carol, alice);
        assert!(clients[0].drain().is_empty());
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Challenging));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Challenged));
        assert_eq!(lobby.pending_challenges(), 1);
    }

    #[tokio::test]
    async fn test_stale_accept_normalizes_leftovers() {
        let (mut lobby, clients) = lobby_with(&["Alice", "Bob", "Carol"]);
        let (alice, bob, carol) = (clients[0].id, clients[1].id, clients[2].id);
        lobby.propose_challenge(alice, bob).unwrap();

        // Carol was never challenged by Alice; nothing of Alice/Bob is touched.
        assert_eq!(lobby.accept_challenge(carol, alice, Instant::now()), Err(LobbyError::StaleChallenge));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Challenged));

        // Alice's half disappears; Bob's dangling half is released on accept.
        lobby.registry.get_mut(&alice).unwrap().presence = Presence::Available;
        assert_eq!(lobby.accept_challenge(bob, alice, Instant::now()), Err(LobbyError::StaleChallenge));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Available));
        assert!(lobby.rooms().is_empty());
    }

    #[tokio::test]
    async fn test_expire_with_old_ticket_is_noop() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob"]);
        let (alice, bob) = (clients[0].id, clients[1].id);

        let first = lobby.propose_challenge(alice, bob).unwrap();
        lobby.reject_challenge(bob, alice);
        let second = lobby.propose_challenge(alice, bob).unwrap();
        clients[0].drain();

        assert!(!lobby.expire_challenge(&first));
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Challenging));
        assert!(clients[0].drain().is_empty());

        assert!(lobby.expire_challenge(&second));
        assert!(!lobby.expire_challenge(&second));
    }

    #[tokio::test]
    async fn test_abandon_notifies_counterpart() {
        let (mut lobby, mut clients) = lobby_with(&["Alice", "Bob"]);
        let (alice, bob) = (clients[0].id, clients[1].id);
        lobby.propose_challenge(alice, bob).unwrap();

        lobby.abandon_challenges(&bob);
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Available));
        assert_eq!(lobby.pending_challenges(), 0);

        let cancelled = clients[0].drain_matching(|m| matches!(m, ServerMessage::ChallengeCancelled(_)));
        assert!(matches!(cancelled.as_slice(), [ServerMessage::ChallengeCancelled(c)] if c.by == "Bob"));
    }

    async fn shared_with(names: &[&str]) -> (SharedLobby, Vec<TestClient>) {
        let shared = SharedLobby::new(LobbyConfig::default());
        let mut clients = Vec::new();
        {
            let mut lobby = shared.lock().await;
            let now = Instant::now();
            for name in names {
                let client = connect(&mut lobby, now);
                lobby.login(client.id, name, now).unwrap();
                clients.push(client);
            }
        }
        for client in clients.iter_mut() {
            client.drain();
        }
        (shared, clients)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_challenge_times_out_once() {
        let (shared, mut clients) = shared_with(&["Alice", "Bob"]).await;
        let (alice, bob) = (clients[0].id, clients[1].id);

        shared.challenge(alice, bob).await.unwrap();
        sleep(Duration::from_secs(29)).await;
        assert!(clients[0].drain_matching(is_timeout).is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(clients[0].drain_matching(is_timeout).len(), 1);
        assert_eq!(clients[1].drain_matching(is_timeout).len(), 1);

        sleep(Duration::from_secs(60)).await;
        assert!(clients[0].drain_matching(is_timeout).is_empty());
        assert!(clients[1].drain_matching(is_timeout).is_empty());

        let lobby = shared.lock().await;
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Available));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Available));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_after_expiry_is_stale() {
        let (shared, mut clients) = shared_with(&["Alice", "Bob"]).await;
        let (alice, bob) = (clients[0].id, clients[1].id);

        shared.challenge(alice, bob).await.unwrap();
        sleep(Duration::from_secs(31)).await;
        assert_eq!(clients[1].drain_matching(is_timeout).len(), 1);

        let result = shared.accept_challenge(bob, alice).await;
        assert_eq!(result, Err(LobbyError::StaleChallenge));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(clients[0].drain_matching(is_timeout).len(), 1);
        assert!(clients[1].drain_matching(is_timeout).is_empty());

        let lobby = shared.lock().await;
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Available));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Available));
        assert_eq!(lobby.pending_challenges(), 0);
        assert!(lobby.rooms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_after_expiry_changes_nothing() {
        let (shared, mut clients) = shared_with(&["Alice", "Bob"]).await;
        let (alice, bob) = (clients[0].id, clients[1].id);

        shared.challenge(alice, bob).await.unwrap();
        sleep(Duration::from_secs(31)).await;
        assert_eq!(clients[0].drain_matching(is_timeout).len(), 1);
        clients[1].drain();

        shared.reject_challenge(bob, alice).await;
        sleep(Duration::from_secs(60)).await;

        let alice_messages = clients[0].drain();
        assert!(!alice_messages.iter().any(is_timeout));
        assert!(!alice_messages.iter().any(|m| matches!(m, ServerMessage::ChallengeRejected(_))));
        assert!(clients[1].drain_matching(is_timeout).is_empty());

        let lobby = shared.lock().await;
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::Available));
        assert_eq!(status(&lobby, &bob), Some(ParticipantStatus::Available));
        assert_eq!(lobby.pending_challenges(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_cancels_expiry() {
        let (shared, mut clients) = shared_with(&["Alice", "Bob"]).await;
        let (alice, bob) = (clients[0].id, clients[1].id);

        shared.challenge(alice, bob).await.unwrap();
        sleep(Duration::from_secs(10)).await;
        let room = shared.accept_challenge(bob, alice).await.unwrap();

        sleep(Duration::from_secs(60)).await;
        assert!(clients[0].drain_matching(is_timeout).is_empty());
        assert!(clients[1].drain_matching(is_timeout).is_empty());

        let lobby = shared.lock().await;
        assert!(lobby.rooms().get(&room).is_some());
        assert_eq!(status(&lobby, &alice), Some(ParticipantStatus::InDuel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rechallenge_after_reject_gets_fresh_timer() {
        let (shared, mut clients) = shared_with(&["Alice", "Bob"]).await;
        let (alice, bob) = (clients[0].id, clients[1].id);

        shared.challenge(alice, bob).await.unwrap();
        sleep(Duration::from_secs(20)).await;
        shared.reject_challenge(bob, alice).await;
        shared.challenge(alice, bob).await.unwrap();

        // The first timer would have fired at 30s.
        sleep(Duration::from_secs(15)).await;
        assert!(clients[1].drain_matching(is_timeout).is_empty());

        sleep(Duration::from_secs(20)).await;
        assert_eq!(clients[1].drain_matching(is_timeout).len(), 1);
    }
}
