//! Shot controller: turns aim input into an impulse and records the shot

use glam::Vec2;
use tracing::{debug, info};

use super::physics::PhysicsEngine;
use super::session::{GameSession, SeatId};
use super::simulation::Simulation;
use super::snapshot::{CueShot, Snapshot};

/// A fire event from a seat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRequest {
    pub seat: SeatId,
    /// Aim direction on the table plane
    pub direction: Vec2,
    /// Draw-back distance, display metres
    pub pull_distance: f32,
    /// Distance from the shooter to the cue ball, display metres
    pub reach: f32,
}

/// An accepted shot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotOutcome {
    pub impulse: Vec2,
    pub time_passed_ms: u64,
}

/// Accepts shots and keeps the inter-shot clock
#[derive(Debug, Default)]
pub struct ShotController {
    last_shot_ms: Option<u64>,
}

impl ShotController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous shot (new session)
    pub fn reset(&mut self) {
        self.last_shot_ms = None;
    }

    /// Time charged to the turn that ends with this shot. The turn ends when
    /// the table came to near-rest, unless that happened before the previous
    /// shot.
    fn elapsed(&self, now_ms: u64, near_settle_ms: Option<u64>) -> u64 {
        let Some(last) = self.last_shot_ms else {
            return 0;
        };
        let end = match near_settle_ms {
            Some(settled) if settled > last => settled.min(now_ms),
            _ => now_ms,
        };
        end.saturating_sub(last)
    }

    /// Take a shot. Out of reach or malformed input is silently ignored:
    /// nothing is recorded and the board is untouched.
    pub fn fire<P: PhysicsEngine>(
        &mut self,
        sim: &mut Simulation<P>,
        session: &mut GameSession,
        request: &ShotRequest,
        now_ms: u64,
    ) -> Option<ShotOutcome> {
        let max_reach = sim.config().max_reach;
        if !request.reach.is_finite() || request.reach > max_reach {
            debug!(seat = %request.seat, reach = request.reach, "Shot out of reach");
            return None;
        }
        if !request.direction.is_finite()
            || !request.pull_distance.is_finite()
            || request.pull_distance < 0.0
        {
            debug!(seat = %request.seat, "Malformed shot ignored");
            return None;
        }
        sim.balls().cue_body()?;

        let impulse = -request.direction * request.pull_distance * sim.config().impulse_scale;
        let time_passed_ms = self.elapsed(now_ms, sim.last_near_settle_ms());
        self.last_shot_ms = Some(now_ms);

        session.record(Snapshot {
            time_passed_ms,
            shooter: request.seat,
            balls: sim.board_state(),
            cue: CueShot {
                velocity: impulse,
                distance: request.pull_distance,
            },
        });

        sim.apply_cue_impulse(impulse);
        sim.wake();

        info!(
            seat = %request.seat,
            pull = request.pull_distance,
            time_passed_ms,
            shot = session.snapshots().len(),
            "Shot taken"
        );

        Some(ShotOutcome {
            impulse,
            time_passed_ms,
        })
    }
}
