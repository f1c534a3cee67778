//! Game Logic Module
//!
//! Army chess pieces and the duel resolution rules. Pure, no I/O.
//!
//! ## Module Structure
//!
//! - `piece`: The eleven pieces, their ranks and wire names
//! - `rules`: Resolution of two simultaneously revealed pieces

pub mod piece;
pub mod rules;

// Re-export key types
pub use piece::{Piece, UnknownPiece};
pub use rules::{resolve, Outcome, Resolution};
