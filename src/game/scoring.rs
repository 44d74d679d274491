//! Post-game scoring derived from consecutive snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ball::{BallColor, BallId};
use super::session::{ClosedGame, SeatId};

/// Result for one seated player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    pub player_name: String,
    pub pots: u32,
    pub shots_taken: u32,
    pub is_winner: bool,
}

/// Score a closed game. Needs at least two participants and one shot;
/// anything less is unscored.
///
/// Balls that disappear between two snapshots are credited to the shooter
/// of the earlier one. A seat's colour is the majority colour of what it
/// potted (ties go to blue) and only pots of that colour count.
/// The last shooter wins if one colour was already cleared from the final
/// recorded board, and loses otherwise.
pub fn analyze(game: &ClosedGame) -> Option<Vec<PlayerScore>> {
    if game.participants.len() < 2 {
        return None;
    }
    let snapshots = game.snapshots.as_slice();
    let last = snapshots.last()?;

    let mut potted: BTreeMap<SeatId, Vec<BallId>> = BTreeMap::new();
    for pair in snapshots.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let gone = prev.ball_ids().filter(|id| !next.contains(*id));
        potted.entry(prev.shooter).or_default().extend(gone);
    }

    let remaining = |color: BallColor| last.ball_ids().any(|id| id.color() == color);
    let sweep = !(remaining(BallColor::Orange) && remaining(BallColor::Blue));

    let scores = game
        .participants
        .iter()
        .map(|(seat, name)| {
            let pots = potted.get(seat).map(Vec::as_slice).unwrap_or_default();
            let color = majority_color(pots);
            let pots = color
                .map(|c| pots.iter().filter(|id| id.color() == c).count())
                .unwrap_or(0);
            let shots_taken = snapshots.iter().filter(|s| s.shooter == *seat).count();
            let is_winner = if *seat == last.shooter { sweep } else { !sweep };

            PlayerScore {
                player_name: name.clone(),
                pots: pots as u32,
                shots_taken: shots_taken as u32,
                is_winner,
            }
        })
        .collect();

    Some(scores)
}

fn majority_color(pots: &[BallId]) -> Option<BallColor> {
    if pots.is_empty() {
        return None;
    }
    let orange = pots.iter().filter(|id| id.color() == BallColor::Orange).count();
    if orange * 2 > pots.len() {
        Some(BallColor::Orange)
    } else {
        Some(BallColor::Blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::tests::snap;
    use crate::game::snapshot::{Snapshot, SnapshotLog};

    const ORANGE: [u8; 7] = [3, 4, 8, 10, 11, 13, 15];
    const BLUE: [u8; 7] = [1, 2, 6, 7, 9, 12, 14];

    fn players(n: u8) -> BTreeMap<SeatId, String> {
        (0..n).map(|i| (SeatId(i), format!("player{}", i))).collect()
    }

    fn game(n: u8, snapshots: Vec<Snapshot>) -> ClosedGame {
        ClosedGame {
            game_id: "g".to_string(),
            participants: players(n),
            snapshots: SnapshotLog::from(snapshots),
        }
    }

    fn board(without: &[u8]) -> Vec<BallId> {
        BallId::all()
            .filter(|id| !matches!(id, BallId::Object(n) if without.contains(n)))
            .collect()
    }

    #[test]
    fn orange_sweep_by_last_shooter_wins() {
        // seat 0 pots four orange, seat 1 pots two blue, seat 0 clears the orange
        let snapshots = vec![
            snap(0, 0, &board(&[])),
            snap(1, 1000, &board(&[3, 4, 8, 10])),
            snap(0, 1000, &board(&[3, 4, 8, 10, 1, 2])),
            snap(0, 1000, &board(&[3, 4, 8, 10, 1, 2, 11, 13, 15])),
        ];
        let scores = analyze(&game(2, snapshots)).unwrap();

        assert_eq!(
            scores,
            vec![
                PlayerScore {
                    player_name: "player0".into(),
                    pots: 7,
                    shots_taken: 3,
                    is_winner: true,
                },
                PlayerScore {
                    player_name: "player1".into(),
                    pots: 2,
                    shots_taken: 1,
                    is_winner: false,
                },
            ]
        );
        let last_board = board(&[3, 4, 8, 10, 1, 2, 11, 13, 15]);
        assert!(!last_board.iter().any(|id| ORANGE.iter().any(|n| *id == BallId::Object(*n))));
    }

    #[test]
    fn last_shooter_loses_when_both_colours_remain() {
        let snapshots = vec![
            snap(0, 0, &board(&[])),
            snap(1, 500, &board(&[3])),
            snap(0, 500, &board(&[3, 5])),
        ];
        let scores = analyze(&game(2, snapshots)).unwrap();
        assert!(!scores[0].is_winner);
        assert!(scores[1].is_winner);
        assert_eq!(scores.iter().filter(|s| s.is_winner).count(), 1);
    }

    #[test]
    fn minority_colour_pots_are_not_counted() {
        // seat 0: two orange and one blue -> orange, counts 2
        let snapshots = vec![
            snap(0, 0, &board(&[])),
            snap(1, 0, &board(&[3, 4, BLUE[0]])),
            snap(0, 0, &board(&[3, 4, BLUE[0]])),
        ];
        let scores = analyze(&game(2, snapshots)).unwrap();
        assert_eq!(scores[0].pots, 2);
        assert_eq!(scores[1].pots, 0);
    }

    #[test]
    fn even_split_goes_to_blue() {
        let snapshots = vec![
            snap(0, 0, &board(&[])),
            snap(1, 0, &board(&[3, 1])),
        ];
        assert_eq!(majority_color(&[BallId::Object(3), BallId::Object(1)]), Some(BallColor::Blue));
        let scores = analyze(&game(2, snapshots)).unwrap();
        assert_eq!(scores[0].pots, 1);
    }

    #[test]
    fn single_player_sessions_are_unscored() {
        let snapshots = vec![snap(0, 0, &board(&[])), snap(0, 0, &board(&[3]))];
        assert!(analyze(&game(1, snapshots)).is_none());
        assert!(analyze(&game(2, vec![])).is_none());
    }
}
