//! Seats at the table and the game session they play in

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::snapshot::{Snapshot, SnapshotLog};

/// Number of seats around a table
pub const SEAT_COUNT: u8 = 2;

/// A fixed join slot at the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(pub u8);

impl SeatId {
    pub fn all() -> impl Iterator<Item = SeatId> {
        (0..SEAT_COUNT).map(SeatId)
    }

    pub fn is_valid(self) -> bool {
        self.0 < SEAT_COUNT
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Occupant of a seat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub connection_id: Uuid,
    pub name: String,
}

/// Seat occupancy. A seat holds at most one connection and a connection
/// holds at most one seat.
#[derive(Debug, Default)]
pub struct Seats {
    seats: BTreeMap<SeatId, Occupant>,
}

impl Seats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a seat. Refused when the seat is taken, invalid, or the
    /// connection already sits somewhere.
    pub fn join(&mut self, seat: SeatId, connection_id: Uuid, name: &str) -> bool {
        if !seat.is_valid() || self.seats.contains_key(&seat) || self.seat_of(connection_id).is_some() {
            return false;
        }
        self.seats.insert(
            seat,
            Occupant {
                connection_id,
                name: name.to_string(),
            },
        );
        true
    }

    /// Leave whatever seat the connection holds
    pub fn leave(&mut self, connection_id: Uuid) -> Option<SeatId> {
        let seat = self.seat_of(connection_id)?;
        self.seats.remove(&seat);
        Some(seat)
    }

    pub fn seat_of(&self, connection_id: Uuid) -> Option<SeatId> {
        self.seats
            .iter()
            .find(|(_, o)| o.connection_id == connection_id)
            .map(|(seat, _)| *seat)
    }

    pub fn occupant(&self, seat: SeatId) -> Option<&Occupant> {
        self.seats.get(&seat)
    }

    pub fn is_occupied(&self, seat: SeatId) -> bool {
        self.seats.contains_key(&seat)
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// seat -> player name, for scoring
    pub fn participants(&self) -> BTreeMap<SeatId, String> {
        self.seats
            .iter()
            .map(|(seat, o)| (*seat, o.name.clone()))
            .collect()
    }
}

/// A session closed by game over, ready for scoring
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedGame {
    pub game_id: String,
    pub participants: BTreeMap<SeatId, String>,
    pub snapshots: SnapshotLog,
}

/// One game on one table
#[derive(Debug)]
pub struct GameSession {
    /// Key for saved games
    pub session_id: Uuid,
    game_id: Option<String>,
    participants: BTreeMap<SeatId, String>,
    snapshots: SnapshotLog,
}

impl GameSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            game_id: None,
            participants: BTreeMap::new(),
            snapshots: SnapshotLog::new(),
        }
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.game_id.is_some()
    }

    pub fn snapshots(&self) -> &SnapshotLog {
        &self.snapshots
    }

    pub fn participants(&self) -> &BTreeMap<SeatId, String> {
        &self.participants
    }

    pub fn record(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    /// Swap the whole shot log for a loaded one
    pub fn replace_log(&mut self, log: SnapshotLog) {
        self.snapshots = log;
    }

    /// Close the session and assign its game id. Only the first call
    /// succeeds; the id is final.
    pub fn close(&mut self, participants: BTreeMap<SeatId, String>) -> Option<ClosedGame> {
        if self.game_id.is_some() {
            return None;
        }
        let game_id = Uuid::new_v4().to_string();
        self.game_id = Some(game_id.clone());
        self.participants = participants;
        Some(ClosedGame {
            game_id,
            participants: self.participants.clone(),
            snapshots: self.snapshots.clone(),
        })
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}
