//! Network Layer
//!
//! WebSocket server and JSON wire protocol.
//! All matchmaking state lives in `lobby/`; this layer only decodes,
//! dispatches and delivers.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, GameStatus, DuelResultView};
pub use server::{GameServer, ServerConfig, GameServerError};
