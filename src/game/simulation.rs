//! Simulation loop core: stepping, observation, settle detection
//!
//! The timers live in the table actor. This type only knows how to advance
//! one physics sub-step and how to run one observation tick.

use glam::Vec2;
use tracing::debug;

use crate::config::SimConfig;

use super::ball::{BallId, BallRegistry, BLACK_BALL};
use super::physics::{BodyHandle, BodyLabel, Kinematics, PhysicsEngine};
use super::snapshot::BallState;
use super::table::{Placement, Table};

/// A ball that left play during an observation tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BallExit {
    /// Object ball out of play; its body still has to leave the world
    Removed {
        ball: BallId,
        body: BodyHandle,
        placement: Placement,
    },
    /// Cue ball put back at its start position
    CueReset { placement: Placement },
}

/// Result of one observation tick
#[derive(Debug, Default)]
pub struct Observation {
    /// Position of every ball still in play, simulation units
    pub poses: Vec<(BallId, Vec2)>,
    pub exits: Vec<BallExit>,
    pub collisions: Vec<(BodyLabel, BodyLabel)>,
    /// Every body dropped below the settle threshold; the loop is now idle
    pub settled: bool,
}

pub struct Simulation<P: PhysicsEngine> {
    physics: P,
    table: Table,
    balls: BallRegistry,
    sim: SimConfig,
    running: bool,
    last_near_settle_ms: Option<u64>,
}

impl<P: PhysicsEngine> Simulation<P> {
    /// Build the table and rack the balls. Starts idle.
    pub fn new(mut physics: P, sim: SimConfig) -> Self {
        let table = Table::standard(sim.ball_radius);
        table.build(&mut physics);
        let balls = BallRegistry::rack(&mut physics, &sim);
        Self {
            physics,
            table,
            balls,
            sim,
            running: false,
            last_near_settle_ms: None,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.sim
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn balls(&self) -> &BallRegistry {
        &self.balls
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Last time every body was below the near-settle threshold
    pub fn last_near_settle_ms(&self) -> Option<u64> {
        self.last_near_settle_ms
    }

    /// Start stepping. Returns false when already running.
    pub fn wake(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        true
    }

    /// Stop stepping and bring every ball to rest
    pub fn sleep(&mut self) {
        for ball in self.balls.iter() {
            if let Some(body) = ball.body {
                if let Some(k) = self.physics.kinematics(body) {
                    self.physics.set_kinematics(
                        body,
                        Kinematics {
                            velocity: Vec2::ZERO,
                            angular_velocity: 0.0,
                            ..k
                        },
                    );
                }
            }
        }
        self.running = false;
    }

    /// Advance physics by one fixed sub-step while running
    pub fn substep(&mut self) {
        if self.running {
            self.physics.step(self.sim.physics_dt());
        }
    }

    /// One observation tick: sample poses, classify every ball in play,
    /// handle exits and detect settle.
    pub fn observe(&mut self, now_ms: u64) -> Observation {
        let mut obs = Observation {
            collisions: self.physics.drain_collision_starts(),
            ..Default::default()
        };

        let live: Vec<(BallId, BodyHandle)> = self
            .balls
            .live()
            .filter_map(|b| b.body.map(|body| (b.id, body)))
            .collect();

        for (id, body) in live {
            let Some(k) = self.physics.kinematics(body) else {
                continue;
            };
            let placement = self.table.classify(k.position);
            if !placement.is_out() {
                obs.poses.push((id, k.position));
                continue;
            }

            if id.is_cue() {
                debug!(?placement, "Cue ball left play, resetting");
                self.balls.reset(&mut self.physics, id, &self.sim);
                obs.poses.push((id, self.sim.cue_start));
                obs.exits.push(BallExit::CueReset { placement });
            } else if let Some(body) = self.balls.take_out(id) {
                debug!(ball = %id, ?placement, "Ball left play");
                obs.exits.push(BallExit::Removed {
                    ball: id,
                    body,
                    placement,
                });
            }
        }

        let speeds = self.physics.body_speeds();
        if speeds.iter().all(|s| *s < self.sim.near_settle_epsilon) {
            self.last_near_settle_ms = Some(now_ms);
        }
        if speeds.iter().all(|s| *s < self.sim.settle_epsilon) {
            self.running = false;
            obs.settled = true;
        }

        obs
    }

    /// Drop a detached body from the world. Stale handles are ignored.
    pub fn remove_body(&mut self, body: BodyHandle) -> bool {
        self.physics.remove_body(body)
    }

    /// Whether the game-ending ball has left play
    pub fn black_ball_removed(&self) -> bool {
        self.balls.is_removed(BLACK_BALL)
    }

    /// Kinematics of every ball in play
    pub fn board_state(&self) -> Vec<BallState> {
        self.balls
            .live()
            .filter_map(|b| {
                let body = b.body?;
                self.physics.kinematics(body).map(|k| BallState::new(b.id, k))
            })
            .collect()
    }

    pub fn cue_position(&self) -> Option<Vec2> {
        self.balls
            .cue_body()
            .and_then(|body| self.physics.kinematics(body))
            .map(|k| k.position)
    }

    pub fn ball_kinematics(&self, id: BallId) -> Option<Kinematics> {
        self.balls
            .live_body(id)
            .and_then(|body| self.physics.kinematics(body))
    }

    pub fn apply_cue_impulse(&mut self, impulse: Vec2) -> bool {
        match self.balls.cue_body() {
            Some(body) => self.physics.apply_impulse(body, impulse),
            None => false,
        }
    }

    /// Overwrite a ball's kinematics, bringing it back into play first if
    /// it was removed.
    pub fn force_ball(&mut self, id: BallId, kinematics: Kinematics) -> bool {
        if self.balls.is_removed(id) {
            self.balls.reset(&mut self.physics, id, &self.sim);
        }
        match self.balls.live_body(id) {
            Some(body) => self.physics.set_kinematics(body, kinematics),
            None => false,
        }
    }

    /// Take a ball out of play and out of the world immediately
    pub fn remove_ball_now(&mut self, id: BallId) -> bool {
        self.balls.remove_now(&mut self.physics, id)
    }

    /// Clear the table and rack a fresh set of balls
    pub fn rerack(&mut self) {
        self.balls.clear(&mut self.physics);
        self.balls = BallRegistry::rack(&mut self.physics, &self.sim);
        self.running = false;
        self.last_near_settle_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::TableWorld;

    fn sim() -> Simulation<TableWorld> {
        let config = SimConfig::default();
        Simulation::new(TableWorld::new(&config), config)
    }

    fn run_until_settled(s: &mut Simulation<TableWorld>, max_ticks: usize) -> Option<usize> {
        let per_tick = (s.config().physics_hz / s.config().observation_hz) as usize;
        for tick in 0..max_ticks {
            for _ in 0..per_tick {
                s.substep();
            }
            if s.observe(tick as u64 * 33).settled {
                return Some(tick);
            }
        }
        None
    }

    #[test]
    fn starts_idle_and_wake_is_idempotent() {
        let mut s = sim();
        assert!(!s.is_running());
        assert!(s.wake());
        assert!(!s.wake());
        assert!(s.is_running());
    }

    #[test]
    fn resting_table_settles_on_first_observation() {
        let mut s = sim();
        s.wake();
        let obs = s.observe(0);
        assert!(obs.settled);
        assert!(!s.is_running());
        assert_eq!(obs.poses.len(), 16);
        assert!(obs.exits.is_empty());

        // stays idle: sub-steps do nothing until woken again
        let before = s.board_state();
        s.apply_cue_impulse(Vec2::new(-50.0, 0.0));
        s.substep();
        let cue_before = before.iter().find(|b| b.name == BallId::Cue).unwrap();
        assert_eq!(s.cue_position(), Some(cue_before.position));
    }

    #[test]
    fn shot_runs_then_settles_and_stops() {
        let mut s = sim();
        s.apply_cue_impulse(Vec2::new(-300.0, 2.0));
        s.wake();
        let ticks = run_until_settled(&mut s, 30 * 60).expect("table should settle");
        assert!(ticks > 0);
        assert!(!s.is_running());
        assert!(s.last_near_settle_ms().is_some());
        assert!(s.physics().body_speeds().iter().all(|v| *v < 0.0001));
    }

    #[test]
    fn object_ball_in_pocket_is_removed_but_body_lingers() {
        let mut s = sim();
        let pocket = s.table().pockets()[0].center;
        s.force_ball(BallId::Object(4), Kinematics::at(pocket));
        s.wake();

        let obs = s.observe(10);
        let exit = obs
            .exits
            .iter()
            .find_map(|e| match e {
                BallExit::Removed { ball, body, placement } => Some((*ball, *body, *placement)),
                _ => None,
            })
            .expect("ball 4 exits");
        assert_eq!(exit.0, BallId::Object(4));
        assert_eq!(exit.2, Placement::Pocketed);
        assert!(s.balls().is_removed(BallId::Object(4)));
        assert!(!obs.poses.iter().any(|(id, _)| *id == BallId::Object(4)));

        // body stays in the world until the delayed removal runs
        assert!(s.physics().contains(exit.1));
        assert!(s.remove_body(exit.1));
        assert!(!s.remove_body(exit.1));
        assert!(s.board_state().iter().all(|b| b.name != BallId::Object(4)));
    }

    #[test]
    fn cue_ball_off_the_table_is_reset_not_removed() {
        let mut s = sim();
        s.force_ball(BallId::Cue, Kinematics::at(Vec2::new(400.0, 0.0)));
        let obs = s.observe(0);
        assert!(matches!(
            obs.exits.as_slice(),
            [BallExit::CueReset { placement: Placement::OutOfBound }]
        ));
        assert!(!s.balls().is_removed(BallId::Cue));
        assert_eq!(s.cue_position(), Some(s.config().cue_start));
    }

    #[test]
    fn force_ball_resurrects_removed_ball() {
        let mut s = sim();
        assert!(s.remove_ball_now(BallId::Object(9)));
        assert!(s.balls().is_removed(BallId::Object(9)));

        let k = Kinematics {
            position: Vec2::new(-30.0, 20.0),
            angle: 0.5,
            velocity: Vec2::new(1.0, 2.0),
            angular_velocity: 0.25,
        };
        assert!(s.force_ball(BallId::Object(9), k));
        let forced = s.ball_kinematics(BallId::Object(9)).unwrap();
        assert_eq!(forced.position, k.position);
        assert_eq!(forced.velocity, k.velocity);
        assert_eq!(forced.angular_velocity, k.angular_velocity);
        assert!((forced.angle - k.angle).abs() < 1e-5);
    }

    #[test]
    fn black_ball_removal_is_reported() {
        let mut s = sim();
        assert!(!s.black_ball_removed());
        s.remove_ball_now(BLACK_BALL);
        assert!(s.black_ball_removed());
        s.rerack();
        assert!(!s.black_ball_removed());
        assert_eq!(s.board_state().len(), 16);
    }
}
