//! Duel Resolution Rules
//!
//! Pure function resolving two simultaneously revealed pieces.
//! No state, no side effects.

use std::cmp::Ordering;
use serde::{Serialize, Deserialize};

use crate::game::piece::Piece;

/// What happened to one side of a duel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The piece survived.
    Alive,
    /// The piece was taken out.
    Eliminated,
}

/// Outcomes for both sides, in the order the pieces were given to [`resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Outcome of the first piece.
    pub first: Outcome,
    /// Outcome of the second piece.
    pub second: Outcome,
}

impl Resolution {
    const fn new(first: Outcome, second: Outcome) -> Self {
        Self { first, second }
    }

    /// Same resolution seen from the other side.
    pub fn swapped(self) -> Self {
        Self::new(self.second, self.first)
    }
}

/// Resolve two pieces revealed at the same time.
///
/// - A bomb on either side eliminates both.
/// - A sapper clears a mine.
/// - A mine eliminates any other ranked piece.
/// - Two mines, or two equal ranks, eliminate both.
/// - Otherwise the higher rank survives.
///
/// Total over every pair and symmetric: `resolve(a, b) == resolve(b, a).swapped()`.
pub fn resolve(first: Piece, second: Piece) -> Resolution {
    use Outcome::{Alive, Eliminated};

    match (first, second) {
        (Piece::Bomb, _) | (_, Piece::Bomb) => Resolution::new(Eliminated, Eliminated),
        (Piece::Mine, Piece::Mine) => Resolution::new(Eliminated, Eliminated),
        (Piece::Sapper, Piece::Mine) => Resolution::new(Alive, Eliminated),
        (Piece::Mine, Piece::Sapper) => Resolution::new(Eliminated, Alive),
        (Piece::Mine, _) => Resolution::new(Alive, Eliminated),
        (_, Piece::Mine) => Resolution::new(Eliminated, Alive),
        _ => match first.rank().cmp(&second.rank()) {
            Ordering::Greater => Resolution::new(Alive, Eliminated),
            Ordering::Less => Resolution::new(Eliminated, Alive),
            Ordering::Equal => Resolution::new(Eliminated, Eliminated),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use Outcome::{Alive, Eliminated};

    fn any_piece() -> impl Strategy<Value = Piece> {
        prop::sample::select(Piece::ALL.to_vec())
    }

    #[test]
    fn test_bomb_takes_out_commander() {
        let result = resolve(Piece::Commander, Piece::Bomb);
        assert_eq!(result, Resolution::new(Eliminated, Eliminated));
    }

    #[test]
    fn test_sapper_clears_mine() {
        assert_eq!(resolve(Piece::Sapper, Piece::Mine), Resolution::new(Alive, Eliminated));
        assert_eq!(resolve(Piece::Mine, Piece::Sapper), Resolution::new(Eliminated, Alive));
    }

    #[test]
    fn test_mine_beats_ranked_pieces() {
        for piece in Piece::ALL {
            if matches!(piece, Piece::Sapper | Piece::Mine | Piece::Bomb) {
                continue;
            }
            assert_eq!(
                resolve(Piece::Mine, piece),
                Resolution::new(Alive, Eliminated),
                "mine vs {piece}"
            );
        }
    }

    #[test]
    fn test_mine_against_mine() {
        assert_eq!(resolve(Piece::Mine, Piece::Mine), Resolution::new(Eliminated, Eliminated));
    }

    #[test]
    fn test_higher_rank_wins() {
        assert_eq!(
            resolve(Piece::General, Piece::PlatoonCommander),
            Resolution::new(Alive, Eliminated)
        );
        assert_eq!(
            resolve(Piece::Sapper, Piece::CompanyCommander),
            Resolution::new(Eliminated, Alive)
        );
    }

    #[test]
    fn test_equal_ranks_trade() {
        assert_eq!(
            resolve(Piece::BrigadeCommander, Piece::BrigadeCommander),
            Resolution::new(Eliminated, Eliminated)
        );
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(serde_json::to_string(&Alive).unwrap(), "\"alive\"");
        assert_eq!(serde_json::to_string(&Eliminated).unwrap(), "\"eliminated\"");
    }

    proptest! {
        #[test]
        fn prop_resolution_is_symmetric(a in any_piece(), b in any_piece()) {
            prop_assert_eq!(resolve(a, b), resolve(b, a).swapped());
        }

        #[test]
        fn prop_someone_is_always_eliminated(a in any_piece(), b in any_piece()) {
            let result = resolve(a, b);
            prop_assert!(result.first == Eliminated || result.second == Eliminated);
        }
    }
}
