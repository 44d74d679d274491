//! Ball identities, colour categories and the registry of the 16 playable bodies

use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

use super::physics::{BodyHandle, BodyLabel, PhysicsEngine};

/// Number of object balls on the rack
pub const OBJECT_BALLS: u8 = 15;

/// The ball whose removal ends the game
pub const BLACK_BALL: BallId = BallId::Object(5);

/// Identity of a playable ball. Serialized as `"1"`..`"15"` or `"cue"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BallId {
    Object(u8),
    Cue,
}

impl BallId {
    /// Every playable ball, object balls first
    pub fn all() -> impl Iterator<Item = BallId> {
        (1..=OBJECT_BALLS).map(BallId::Object).chain(std::iter::once(BallId::Cue))
    }

    pub fn is_cue(self) -> bool {
        matches!(self, BallId::Cue)
    }

    pub fn color(self) -> BallColor {
        match self {
            BallId::Cue => BallColor::White,
            BallId::Object(5) => BallColor::Black,
            BallId::Object(1 | 2 | 6 | 7 | 9 | 12 | 14) => BallColor::Blue,
            BallId::Object(_) => BallColor::Orange,
        }
    }
}

impl fmt::Display for BallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallId::Object(n) => write!(f, "{}", n),
            BallId::Cue => f.write_str("cue"),
        }
    }
}

impl From<BallId> for String {
    fn from(id: BallId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for BallId {
    type Error = UnknownBall;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl std::str::FromStr for BallId {
    type Err = UnknownBall;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == "cue" {
            return Ok(BallId::Cue);
        }
        match raw.parse::<u8>() {
            Ok(n) if (1..=OBJECT_BALLS).contains(&n) => Ok(BallId::Object(n)),
            _ => Err(UnknownBall(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ball identity: {0:?}")]
pub struct UnknownBall(pub String);

/// Colour category of a ball
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallColor {
    Orange,
    Blue,
    Black,
    White,
}

/// A playable ball. Kinematics live in the physics engine, not here.
#[derive(Debug, Clone)]
pub struct Ball {
    pub id: BallId,
    /// Body currently representing this ball in play
    pub body: Option<BodyHandle>,
    /// Out of play (pocketed or off the table)
    pub removed: bool,
    /// Where the ball is (re)created
    pub home: Vec2,
}

/// Lifecycle of the 16 balls on one table
#[derive(Debug, Default)]
pub struct BallRegistry {
    balls: Vec<Ball>,
}

impl BallRegistry {
    /// Create every ball at its rack (or cue start) position
    pub fn rack<P: PhysicsEngine>(physics: &mut P, sim: &SimConfig) -> Self {
        let positions = rack_positions(sim);
        let balls = BallId::all()
            .map(|id| {
                let home = match id {
                    BallId::Object(n) => positions[(n - 1) as usize],
                    BallId::Cue => sim.cue_start,
                };
                let body = physics.create_circle(BodyLabel::Ball(id), home, sim.ball_radius);
                Ball {
                    id,
                    body: Some(body),
                    removed: false,
                    home,
                }
            })
            .collect();
        Self { balls }
    }

    pub fn get(&self, id: BallId) -> Option<&Ball> {
        self.balls.iter().find(|b| b.id == id)
    }

    fn get_mut(&mut self, id: BallId) -> Option<&mut Ball> {
        self.balls.iter_mut().find(|b| b.id == id)
    }

    /// Body of a ball still in play
    pub fn live_body(&self, id: BallId) -> Option<BodyHandle> {
        self.get(id).filter(|b| !b.removed).and_then(|b| b.body)
    }

    pub fn cue_body(&self) -> Option<BodyHandle> {
        self.live_body(BallId::Cue)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ball> {
        self.balls.iter()
    }

    /// Balls still in play
    pub fn live(&self) -> impl Iterator<Item = &Ball> {
        self.balls.iter().filter(|b| !b.removed)
    }

    pub fn is_removed(&self, id: BallId) -> bool {
        self.get(id).map(|b| b.removed).unwrap_or(true)
    }

    /// Take a ball out of play. The body is detached and returned so the
    /// caller can drop it from the world now or after a delay.
    pub fn take_out(&mut self, id: BallId) -> Option<BodyHandle> {
        let ball = self.get_mut(id)?;
        if ball.removed {
            return None;
        }
        ball.removed = true;
        ball.body.take()
    }

    /// Remove a ball from play and from the world immediately
    pub fn remove_now<P: PhysicsEngine>(&mut self, physics: &mut P, id: BallId) -> bool {
        match self.take_out(id) {
            Some(body) => {
                physics.remove_body(body);
                true
            }
            None => self.get(id).is_some_and(|b| b.removed),
        }
    }

    /// Put a ball back in play at its home position with a fresh body
    pub fn reset<P: PhysicsEngine>(
        &mut self,
        physics: &mut P,
        id: BallId,
        sim: &SimConfig,
    ) -> Option<BodyHandle> {
        let ball = self.get_mut(id)?;
        if let Some(old) = ball.body.take() {
            physics.remove_body(old);
        }
        let body = physics.create_circle(BodyLabel::Ball(id), ball.home, sim.ball_radius);
        ball.body = Some(body);
        ball.removed = false;
        Some(body)
    }

    /// Drop every body from the world
    pub fn clear<P: PhysicsEngine>(&mut self, physics: &mut P) {
        for ball in &mut self.balls {
            if let Some(body) = ball.body.take() {
                physics.remove_body(body);
            }
            ball.removed = true;
        }
    }
}

/// Triangle rack: five rows growing away from the apex along -x.
pub fn rack_positions(sim: &SimConfig) -> Vec<Vec2> {
    let r = sim.ball_radius * 1.01;
    let row_depth = 2.0 * r * 30f32.to_radians().cos();
    let mut positions = Vec::with_capacity(OBJECT_BALLS as usize);
    for row in 0..5u8 {
        for k in 0..=row {
            let x = sim.rack_apex.x - row as f32 * row_depth;
            let y = sim.rack_apex.y - row as f32 * r + k as f32 * 2.0 * r;
            positions.push(Vec2::new(x, y));
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::TableWorld;

    #[test]
    fn identities_round_trip_through_strings() {
        for id in BallId::all() {
            let s: String = id.into();
            assert_eq!(s.parse::<BallId>().unwrap(), id);
        }
        assert_eq!(BallId::Cue.to_string(), "cue");
        assert!("16".parse::<BallId>().is_err());
        assert!("0".parse::<BallId>().is_err());
        assert!("eight".parse::<BallId>().is_err());
    }

    #[test]
    fn colour_lookup() {
        assert_eq!(BallId::Cue.color(), BallColor::White);
        assert_eq!(BLACK_BALL.color(), BallColor::Black);
        let orange = BallId::all().filter(|b| b.color() == BallColor::Orange).count();
        let blue = BallId::all().filter(|b| b.color() == BallColor::Blue).count();
        assert_eq!(orange, 7);
        assert_eq!(blue, 7);
        assert_eq!(BallId::Object(3).color(), BallColor::Orange);
        assert_eq!(BallId::Object(14).color(), BallColor::Blue);
    }

    #[test]
    fn rack_has_no_overlaps() {
        let sim = SimConfig::default();
        let positions = rack_positions(&sim);
        assert_eq!(positions.len(), 15);
        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                let d = positions[i].distance(positions[j]);
                assert!(d >= 2.0 * sim.ball_radius, "balls {} and {} overlap", i + 1, j + 1);
            }
        }
    }

    #[test]
    fn take_out_then_reset() {
        let sim = SimConfig::default();
        let mut world = TableWorld::new(&sim);
        let mut balls = BallRegistry::rack(&mut world, &sim);
        assert_eq!(balls.live().count(), 16);

        let body = balls.take_out(BallId::Object(3)).expect("ball in play");
        assert!(balls.is_removed(BallId::Object(3)));
        assert!(balls.take_out(BallId::Object(3)).is_none());
        assert!(world.remove_body(body));

        let fresh = balls.reset(&mut world, BallId::Object(3), &sim).unwrap();
        assert_ne!(fresh, body);
        assert!(!balls.is_removed(BallId::Object(3)));
        assert_eq!(balls.live().count(), 16);
    }
}
