//! Table geometry: rails, pockets and the playable bound
//!
//! All coordinates are simulation units with the table centred on the origin.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::physics::{BodyLabel, PhysicsEngine};

/// One static rail segment
#[derive(Debug, Clone, Copy)]
pub struct Wall {
    pub center: Vec2,
    pub half_extents: Vec2,
    /// Radians
    pub rotation: f32,
}

/// Circular pocket exclusion region
#[derive(Debug, Clone, Copy)]
pub struct Pocket {
    pub center: Vec2,
    pub radius: f32,
}

/// Axis-aligned playable bound
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Where a ball is relative to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Pocketed,
    OutOfBound,
    InBound,
}

impl Placement {
    /// Whether the ball has left play
    pub fn is_out(self) -> bool {
        !matches!(self, Placement::InBound)
    }
}

/// Immutable table layout
#[derive(Debug, Clone)]
pub struct Table {
    walls: Vec<Wall>,
    pockets: [Pocket; 6],
    bounds: Bounds,
}

// (center x, center y, width, height, rotation in degrees)
const WALLS: [(f32, f32, f32, f32, f32); 34] = [
    // long cushions
    (-54.23, 72.0, 92.0, 15.0, 0.0),
    (54.23, 72.0, 92.0, 15.0, 0.0),
    (-54.23, -72.0, 92.0, 15.0, 0.0),
    (54.23, -72.0, 92.0, 15.0, 0.0),
    // short cushions
    (-117.29, 0.0, 15.0, 108.0, 0.0),
    (117.29, 0.0, 15.0, 108.0, 0.0),
    // outer frame
    (0.0, 87.0, 250.0, 15.0, 0.0),
    (0.0, -87.0, 250.0, 15.0, 0.0),
    (132.29, 0.0, 15.0, 189.0, 0.0),
    (-132.29, 0.0, 15.0, 189.0, 0.0),
    // top left jaws
    (-97.53776, 72.32636, 7.0, 15.0, -44.0),
    (-101.7654, 74.86261, 7.0, 11.0, 0.0),
    (-14.87916, 68.66277, 4.6, 15.0, 75.0),
    (-10.53943, 74.44326, 7.0, 11.0, 0.0),
    // top right jaws
    (97.53776, 72.32636, 7.0, 15.0, 44.0),
    (101.7654, 74.86261, 7.0, 11.0, 0.0),
    (14.87916, 68.66277, 4.6, 15.0, -75.0),
    (10.53943, 74.44326, 7.0, 11.0, 0.0),
    // bottom left jaws
    (-97.53776, -72.32636, 7.0, 15.0, 44.0),
    (-101.7654, -74.86261, 7.0, 11.0, 0.0),
    (-14.87916, -68.66277, 4.6, 15.0, -75.0),
    (-10.53943, -74.44326, 7.0, 11.0, 0.0),
    // bottom right jaws
    (97.53776, -72.32636, 7.0, 15.0, -44.0),
    (101.7654, -74.86261, 7.0, 11.0, 0.0),
    (14.87916, -68.66277, 4.6, 15.0, 75.0),
    (10.53943, -74.44326, 7.0, 11.0, 0.0),
    // left end jaws
    (-117.5176, 52.03626, 7.0, 15.0, -44.0),
    (-119.8254, 56.36261, 10.0, 7.0, 0.0),
    (-117.5176, -52.03626, 7.0, 15.0, 44.0),
    (-119.8254, -56.36261, 10.0, 7.0, 0.0),
    // right end jaws
    (117.5176, 52.03626, 7.0, 15.0, 44.0),
    (119.8254, 56.36261, 10.0, 7.0, 0.0),
    (117.5176, -52.03626, 7.0, 15.0, -44.0),
    (119.8254, -56.36261, 10.0, 7.0, 0.0),
];

const CORNER_POCKET_RADIUS: f32 = 8.5;
const SIDE_POCKET_RADIUS: f32 = 7.0;
const FRAME_HALF_THICKNESS: f32 = 7.5;

impl Table {
    /// The standard table. `ball_radius` widens the bound so a ball resting
    /// against the frame still counts as on the table.
    pub fn standard(ball_radius: f32) -> Self {
        let walls = WALLS
            .iter()
            .map(|&(x, y, w, h, deg)| Wall {
                center: Vec2::new(x, y),
                half_extents: Vec2::new(w, h) * 0.5,
                rotation: deg.to_radians(),
            })
            .collect();

        let pocket = |x: f32, y: f32, radius: f32| Pocket {
            center: Vec2::new(x, y),
            radius,
        };
        let pockets = [
            pocket(113.7, 68.2, CORNER_POCKET_RADIUS),
            pocket(-113.7, 68.2, CORNER_POCKET_RADIUS),
            pocket(0.0, 70.9, SIDE_POCKET_RADIUS),
            pocket(113.7, -68.2, CORNER_POCKET_RADIUS),
            pocket(-113.7, -68.2, CORNER_POCKET_RADIUS),
            pocket(0.0, -70.9, SIDE_POCKET_RADIUS),
        ];

        let margin = FRAME_HALF_THICKNESS + ball_radius * 0.9;
        let bounds = Bounds {
            min: Vec2::new(-132.29 - margin, -87.0 - margin),
            max: Vec2::new(132.29 + margin, 87.0 + margin),
        };

        Self {
            walls,
            pockets,
            bounds,
        }
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn pockets(&self) -> &[Pocket; 6] {
        &self.pockets
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Classify a ball centre against pockets first, then the bound
    pub fn classify(&self, position: Vec2) -> Placement {
        if self
            .pockets
            .iter()
            .any(|p| p.center.distance(position) < p.radius)
        {
            Placement::Pocketed
        } else if !self.bounds.contains(position) {
            Placement::OutOfBound
        } else {
            Placement::InBound
        }
    }

    /// Add every rail to the world as a static body
    pub fn build<P: PhysicsEngine>(&self, physics: &mut P) {
        for wall in &self.walls {
            physics.create_rectangle(BodyLabel::Wall, wall.center, wall.half_extents, wall.rotation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::game::physics::TableWorld;

    fn table() -> Table {
        Table::standard(SimConfig::default().ball_radius)
    }

    #[test]
    fn pocket_interior_is_strict() {
        let t = table();
        let side = t.pockets()[2];
        assert_eq!(t.classify(side.center), Placement::Pocketed);
        assert_eq!(
            t.classify(side.center + Vec2::new(side.radius - 0.01, 0.0)),
            Placement::Pocketed
        );
        // exactly on the rim is not inside
        assert_eq!(
            t.classify(side.center - Vec2::new(side.radius, 0.0)),
            Placement::InBound
        );
    }

    #[test]
    fn outside_the_frame_is_out_of_bound() {
        let t = table();
        assert_eq!(t.classify(Vec2::new(0.0, 0.0)), Placement::InBound);
        assert_eq!(t.classify(Vec2::new(200.0, 0.0)), Placement::OutOfBound);
        assert_eq!(t.classify(Vec2::new(0.0, -120.0)), Placement::OutOfBound);
        assert!(t.classify(Vec2::new(-300.0, 300.0)).is_out());
        assert!(!t.classify(Vec2::new(70.0, 0.0)).is_out());
    }

    #[test]
    fn rack_area_is_in_bound() {
        let sim = SimConfig::default();
        let t = table();
        for p in crate::game::ball::rack_positions(&sim) {
            assert_eq!(t.classify(p), Placement::InBound);
        }
        assert_eq!(t.classify(sim.cue_start), Placement::InBound);
    }

    #[test]
    fn build_adds_one_body_per_wall() {
        let t = table();
        let mut world = TableWorld::new(&SimConfig::default());
        t.build(&mut world);
        assert_eq!(world.body_count(), t.walls().len());
    }
}
