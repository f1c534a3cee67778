//! # Junqi Duel Server
//!
//! Matchmaking and one-round army chess duels over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    JUNQI DUEL SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Pure rules                                │
//! │  ├── piece.rs    - The eleven pieces and their ranks         │
//! │  └── rules.rs    - Simultaneous reveal resolution            │
//! │                                                              │
//! │  lobby/          - Authoritative in-memory state             │
//! │  ├── mod.rs      - Lobby, SharedLobby, delivery, timers      │
//! │  ├── registry.rs - Logged-in participants                    │
//! │  ├── rooms.rs    - Live duels                                │
//! │  ├── challenge.rs- Propose / accept / reject / expire        │
//! │  ├── duel.rs     - Choices, results, mutual reset            │
//! │  └── liveness.rs - Ping sweep, eviction, room reaper         │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  └── protocol.rs - Message types                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization Guarantee
//!
//! Every lobby transition runs under one lock, from lookup to the last
//! queued notification. Timer callbacks re-check state under that lock, so
//! a timer that fires after its challenge was settled does nothing.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod lobby;
pub mod network;

// Re-export commonly used types
pub use game::{Piece, Outcome, resolve};
pub use lobby::{ConnectionId, RoomId, Lobby, LobbyConfig, LobbyError, SharedLobby};
pub use network::{GameServer, ServerConfig, GameServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
