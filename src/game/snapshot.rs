//! Shot snapshots and the append-only shot log

use std::collections::HashSet;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::ball::BallId;
use super::physics::Kinematics;
use super::session::SeatId;

/// Kinematic state of one ball at the moment a shot was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallState {
    pub name: BallId,
    pub position: Vec2,
    pub angle: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
}

impl BallState {
    pub fn new(name: BallId, k: Kinematics) -> Self {
        Self {
            name,
            position: k.position,
            angle: k.angle,
            velocity: k.velocity,
            angular_velocity: k.angular_velocity,
        }
    }

    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            position: self.position,
            angle: self.angle,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
        }
    }

    fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.angle.is_finite()
            && self.angular_velocity.is_finite()
    }
}

/// The shot that was played from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CueShot {
    /// Impulse applied to the cue ball
    pub velocity: Vec2,
    /// Pull distance, display metres
    pub distance: f32,
}

/// Pre-shot board state plus the shot that produced the next state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Time since the previous shot, milliseconds
    #[serde(rename = "timePassed")]
    pub time_passed_ms: u64,
    #[serde(rename = "playerId")]
    pub shooter: SeatId,
    /// Balls still in play; removed balls are absent
    pub balls: Vec<BallState>,
    pub cue: CueShot,
}

impl Snapshot {
    pub fn ball(&self, id: BallId) -> Option<&BallState> {
        self.balls.iter().find(|b| b.name == id)
    }

    pub fn contains(&self, id: BallId) -> bool {
        self.ball(id).is_some()
    }

    pub fn ball_ids(&self) -> impl Iterator<Item = BallId> + '_ {
        self.balls.iter().map(|b| b.name)
    }

    fn validate(&self, index: usize) -> Result<(), LogCodecError> {
        if !self.shooter.is_valid() {
            return Err(LogCodecError::UnknownSeat {
                index,
                seat: self.shooter,
            });
        }
        let mut seen = HashSet::new();
        for ball in &self.balls {
            if !seen.insert(ball.name) {
                return Err(LogCodecError::DuplicateBall { index, ball: ball.name });
            }
            if !ball.is_finite() {
                return Err(LogCodecError::NonFinite { index });
            }
        }
        if !self.cue.velocity.is_finite() || !self.cue.distance.is_finite() {
            return Err(LogCodecError::NonFinite { index });
        }
        Ok(())
    }
}

/// Chronological shot log of one game
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotLog {
    snapshots: Vec<Snapshot>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    pub fn as_slice(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate a serialized log. Nothing is returned unless the
    /// whole payload is valid.
    pub fn from_json(payload: &str) -> Result<Self, LogCodecError> {
        let log: SnapshotLog = serde_json::from_str(payload)?;
        for (index, snapshot) in log.snapshots.iter().enumerate() {
            snapshot.validate(index)?;
        }
        Ok(log)
    }
}

impl From<Vec<Snapshot>> for SnapshotLog {
    fn from(snapshots: Vec<Snapshot>) -> Self {
        Self { snapshots }
    }
}

/// Reasons a serialized log is refused
#[derive(Debug, thiserror::Error)]
pub enum LogCodecError {
    #[error("Malformed snapshot log: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot {index} lists ball {ball} twice")]
    DuplicateBall { index: usize, ball: BallId },

    #[error("Snapshot {index} was shot from unknown seat {seat}")]
    UnknownSeat { index: usize, seat: SeatId },

    #[error("Snapshot {index} contains a non-finite number")]
    NonFinite { index: usize },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn state(id: BallId, x: f32, y: f32) -> BallState {
        BallState::new(id, Kinematics::at(Vec2::new(x, y)))
    }

    pub(crate) fn snap(shooter: u8, time_passed_ms: u64, balls: &[BallId]) -> Snapshot {
        Snapshot {
            time_passed_ms,
            shooter: SeatId(shooter),
            balls: balls
                .iter()
                .enumerate()
                .map(|(i, id)| state(*id, i as f32 * 7.0 - 40.0, 0.0))
                .collect(),
            cue: CueShot {
                velocity: Vec2::new(-120.0, 15.5),
                distance: 0.25,
            },
        }
    }

    #[test]
    fn log_survives_serialization_field_for_field() {
        let mut log = SnapshotLog::new();
        let mut first = snap(0, 0, &BallId::all().collect::<Vec<_>>());
        first.balls[3].velocity = Vec2::new(0.1234567, -98.76543);
        first.balls[3].angle = 1.0e-7;
        first.balls[3].angular_velocity = -3.3;
        log.push(first);
        log.push(snap(1, 4321, &[BallId::Object(2), BallId::Cue]));

        let json = log.to_json().unwrap();
        let back = SnapshotLog::from_json(&json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn wire_shape_uses_ball_names() {
        let log = SnapshotLog::from(vec![snap(1, 250, &[BallId::Object(11), BallId::Cue])]);
        let value: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(value[0]["timePassed"], 250);
        assert_eq!(value[0]["playerId"], 1);
        assert_eq!(value[0]["balls"][0]["name"], "11");
        assert_eq!(value[0]["balls"][1]["name"], "cue");
        assert!(value[0]["balls"][0].get("angularVelocity").is_some());
    }

    #[test]
    fn malformed_payloads_are_refused() {
        assert!(matches!(SnapshotLog::from_json("not json"), Err(LogCodecError::Json(_))));
        assert!(matches!(SnapshotLog::from_json("{}"), Err(LogCodecError::Json(_))));

        let bad_name = r#"[{"timePassed":0,"playerId":0,"balls":[{"name":"99","position":[0,0],"angle":0,"velocity":[0,0],"angularVelocity":0}],"cue":{"velocity":[1,0],"distance":0.1}}]"#;
        assert!(SnapshotLog::from_json(bad_name).is_err());

        let dup = SnapshotLog::from(vec![snap(0, 0, &[BallId::Cue, BallId::Cue])]);
        let json = dup.to_json().unwrap();
        assert!(matches!(
            SnapshotLog::from_json(&json),
            Err(LogCodecError::DuplicateBall { index: 0, ball: BallId::Cue })
        ));
    }

    #[test]
    fn shots_from_unknown_seats_are_refused() {
        let log = SnapshotLog::from(vec![snap(0, 0, &[BallId::Cue]), snap(7, 10, &[BallId::Cue])]);
        let json = log.to_json().unwrap();
        assert!(matches!(
            SnapshotLog::from_json(&json),
            Err(LogCodecError::UnknownSeat { index: 1, seat: SeatId(7) })
        ));
    }

    #[test]
    fn empty_log_is_valid() {
        let log = SnapshotLog::from_json("[]").unwrap();
        assert!(log.is_empty());
    }
}
