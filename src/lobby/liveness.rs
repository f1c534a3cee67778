//! Liveness Supervisor
//!
//! Ping sweep, eviction of silent connections, disconnect recovery and
//! stale-room reaping. Driven by the interval loops in [`SharedLobby`].
//!
//! [`SharedLobby`]: crate::lobby::SharedLobby

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::lobby::registry::ConnectionId;
use crate::lobby::rooms::RoomId;
use crate::lobby::Lobby;
use crate::network::protocol::ServerMessage;

const REAPED_REASON: &str = "Game closed after exceeding the maximum duration.";

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that were sent a ping.
    pub pinged: usize,
    /// Connections that were evicted.
    pub evicted: Vec<ConnectionId>,
}

impl Lobby {
    /// Ping every live connection and evict the silent ones.
    ///
    /// Logged-in connections are judged by their last liveness ack against
    /// `liveness_timeout`, anonymous ones by connect/last-seen time against
    /// `prelogin_timeout`.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let verdicts: Vec<(ConnectionId, bool)> = self.connections
            .iter()
            .filter(|(_, conn)| conn.kick.is_some())
            .map(|(id, conn)| {
                let (last, limit) = match self.registry.get(id) {
                    Some(p) => (p.last_liveness_ack, self.config.liveness_timeout),
                    None => (conn.last_seen, self.config.prelogin_timeout),
                };
                (*id, now.saturating_duration_since(last) > limit)
            })
            .collect();

        let mut report = SweepReport::default();
        for (id, silent) in verdicts {
            if silent {
                self.evict(&id);
                report.evicted.push(id);
            } else {
                self.send(&id, ServerMessage::Ping);
                report.pinged += 1;
            }
        }
        report
    }

    /// Force-close a connection and recover its state right away.
    pub fn evict(&mut self, id: &ConnectionId) {
        if let Some(kick) = self.connections.get_mut(id).and_then(|c| c.kick.take()) {
            // The socket task may already be gone.
            let _ = kick.send(());
        }
        warn!("Evicting unresponsive connection {} ({})", id, self.name_of(id));
        self.disconnect(id);
    }

    /// Disconnect recovery. Runs once per connection; later calls return false.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        if self.connections.remove(id).is_none() {
            debug!("Connection {} already recovered", id);
            return false;
        }

        self.abandon_challenges(id);
        if let Some(room) = self.registry.presence(id).and_then(|p| p.room()) {
            self.abort_for_disconnect(room, id);
        }

        match self.registry.remove(id) {
            Some(p) => info!("{} ({}) disconnected", p.display_name(), id),
            None => info!("Anonymous connection {} closed", id),
        }
        self.broadcast_roster();
        true
    }

    /// Delete every room older than `max_room_age`.
    pub fn reap_stale_rooms(&mut self, now: Instant) -> Vec<RoomId> {
        let stale = self.rooms.stale(now, self.config.max_room_age);
        for room in &stale {
            if self.close_room(*room, Some(REAPED_REASON.to_string())) {
                info!("Reaped stale room {}", room);
            }
        }
        if !stale.is_empty() {
            self.broadcast_roster();
        }
        stale
    }
}
