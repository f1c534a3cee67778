//! Army Chess Pieces
//!
//! The eleven pieces a duelist can commit to.
//! Wire names are the traditional Junqi piece names.

use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

// =============================================================================
// PIECE
// =============================================================================

/// A Junqi piece.
///
/// Ranked pieces compare by [`Piece::rank`]. The mine and the bomb have no rank
/// and are handled by dedicated rules in [`crate::game::rules`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Piece {
    /// 司令, rank 10.
    #[serde(rename = "司令")]
    Commander,
    /// 军长, rank 9.
    #[serde(rename = "军长")]
    General,
    /// 师长, rank 8.
    #[serde(rename = "师长")]
    DivisionCommander,
    /// 旅长, rank 7.
    #[serde(rename = "旅长")]
    BrigadeCommander,
    /// 团长, rank 6.
    #[serde(rename = "团长")]
    RegimentCommander,
    /// 营长, rank 5.
    #[serde(rename = "营长")]
    BattalionCommander,
    /// 连长, rank 4.
    #[serde(rename = "连长")]
    CompanyCommander,
    /// 排长, rank 3.
    #[serde(rename = "排长")]
    PlatoonCommander,
    /// 工兵, rank 2. The only ranked piece that clears a mine.
    #[serde(rename = "工兵")]
    Sapper,
    /// 地雷. Defeats every ranked piece except the sapper.
    #[serde(rename = "地雷")]
    Mine,
    /// 炸弹. Takes both sides out.
    #[serde(rename = "炸弹")]
    Bomb,
}

impl Piece {
    /// Every piece, highest rank first, specials last.
    pub const ALL: [Piece; 11] = [
        Piece::Commander,
        Piece::General,
        Piece::DivisionCommander,
        Piece::BrigadeCommander,
        Piece::RegimentCommander,
        Piece::BattalionCommander,
        Piece::CompanyCommander,
        Piece::PlatoonCommander,
        Piece::Sapper,
        Piece::Mine,
        Piece::Bomb,
    ];

    /// Wire name of the piece.
    pub fn name(self) -> &'static str {
        match self {
            Piece::Commander => "司令",
            Piece::General => "军长",
            Piece::DivisionCommander => "师长",
            Piece::BrigadeCommander => "旅长",
            Piece::RegimentCommander => "团长",
            Piece::BattalionCommander => "营长",
            Piece::CompanyCommander => "连长",
            Piece::PlatoonCommander => "排长",
            Piece::Sapper => "工兵",
            Piece::Mine => "地雷",
            Piece::Bomb => "炸弹",
        }
    }

    /// Rank for ordinary comparison. `None` for the mine and the bomb.
    #[inline]
    pub fn rank(self) -> Option<u8> {
        match self {
            Piece::Commander => Some(10),
            Piece::General => Some(9),
            Piece::DivisionCommander => Some(8),
            Piece::BrigadeCommander => Some(7),
            Piece::RegimentCommander => Some(6),
            Piece::BattalionCommander => Some(5),
            Piece::CompanyCommander => Some(4),
            Piece::PlatoonCommander => Some(3),
            Piece::Sapper => Some(2),
            Piece::Mine | Piece::Bomb => None,
        }
    }
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A piece name that is not one of the eleven pieces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown piece: {0}")]
pub struct UnknownPiece(pub String);

impl FromStr for Piece {
    type Err = UnknownPiece;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Piece::ALL
            .iter()
            .copied()
            .find(|piece| piece.name() == name)
            .ok_or_else(|| UnknownPiece(s.to_string()))
    }
}
