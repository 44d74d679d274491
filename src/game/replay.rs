//! Deterministic playback of a recorded shot log
//!
//! A replay step runs in two halves. [`ReplayEngine::begin_step`] pauses the
//! table, forces every ball to its recorded state and produces the cue
//! stick animation. After the animation, [`ReplayEngine::strike`] applies
//! the recorded shot and says how long to wait before the next step. After
//! the last shot the engine stays in the replaying phase until the table
//! settles, so the final replayed shot can never be scored as live play.

use std::time::Duration;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ball::BallId;
use super::physics::{Kinematics, PhysicsEngine};
use super::simulation::Simulation;
use super::snapshot::SnapshotLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPhase {
    #[default]
    Live,
    Replaying,
}

/// Cue stick position at a point in the animation, display metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CueKeyframe {
    pub time: f32,
    pub position: Vec2,
}

/// Linear cue stick animation shown before a replayed shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueAnimation {
    /// Heading of the stick on the table plane, radians
    pub yaw: f32,
    pub keyframes: Vec<CueKeyframe>,
}

/// What a replay step did to the board
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    pub index: usize,
    /// Balls brought back into play
    pub restored: Vec<BallId>,
    /// Balls taken out because the recorded board no longer has them
    pub removed: Vec<BallId>,
    pub animation: CueAnimation,
    /// Wait before calling [`ReplayEngine::strike`]
    pub strike_after: Duration,
}

#[derive(Debug, Default)]
pub struct ReplayEngine {
    phase: ReplayPhase,
    cue_tip: Option<Vec2>,
    /// Last recorded shot applied, waiting for the table to settle
    finishing: bool,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    pub fn is_replaying(&self) -> bool {
        self.phase == ReplayPhase::Replaying
    }

    /// Enter replay. Refused while already replaying or with nothing to play.
    pub fn start(&mut self, log: &SnapshotLog) -> bool {
        if self.is_replaying() || log.is_empty() {
            return false;
        }
        self.phase = ReplayPhase::Replaying;
        info!(shots = log.len(), "Replay started");
        true
    }

    pub fn is_finishing(&self) -> bool {
        self.is_replaying() && self.finishing
    }

    /// Back to live play
    pub fn stop(&mut self) {
        self.phase = ReplayPhase::Live;
        self.cue_tip = None;
        self.finishing = false;
    }

    /// Rebuild the board exactly as snapshot `index` recorded it
    pub fn begin_step<P: PhysicsEngine>(
        &mut self,
        index: usize,
        sim: &mut Simulation<P>,
        log: &SnapshotLog,
    ) -> Option<ReplayStep> {
        if !self.is_replaying() {
            return None;
        }
        let Some(snapshot) = log.get(index) else {
            self.stop();
            return None;
        };

        sim.sleep();

        let mut restored = Vec::new();
        for ball in &snapshot.balls {
            if sim.balls().is_removed(ball.name) {
                restored.push(ball.name);
            }
            sim.force_ball(ball.name, ball.kinematics());
        }

        // the cue ball never leaves play; a shot without it starts from the spot
        if !snapshot.contains(BallId::Cue) {
            let spot = sim.config().cue_start;
            sim.force_ball(BallId::Cue, Kinematics::at(spot));
        }

        let absent: Vec<BallId> = sim
            .balls()
            .live()
            .map(|b| b.id)
            .filter(|id| !id.is_cue() && !snapshot.contains(*id))
            .collect();
        for id in &absent {
            sim.remove_ball_now(*id);
        }

        let cue = sim.cue_position().unwrap_or(sim.config().cue_start);
        let animation = self.animate_cue(
            sim.config().to_display(cue),
            snapshot.cue.velocity,
            snapshot.cue.distance,
            sim.config().replay_cue_offset,
            sim.config().cue_keyframes,
        );

        info!(step = index, balls = snapshot.balls.len(), "Replay step");

        Some(ReplayStep {
            index,
            restored,
            removed: absent,
            animation,
            strike_after: sim.config().cue_strike_delay,
        })
    }

    /// Apply the recorded shot of step `index` and resume stepping.
    /// Returns the delay before the next step, or `None` after the last
    /// shot; call [`ReplayEngine::stop`] once the table settles.
    pub fn strike<P: PhysicsEngine>(
        &mut self,
        index: usize,
        sim: &mut Simulation<P>,
        log: &SnapshotLog,
    ) -> Option<Duration> {
        if !self.is_replaying() {
            return None;
        }
        let Some(snapshot) = log.get(index) else {
            self.stop();
            return None;
        };

        sim.wake();
        sim.apply_cue_impulse(snapshot.cue.velocity);

        match log.get(index + 1) {
            Some(next) => Some(Duration::from_millis(next.time_passed_ms)),
            None => {
                info!(shots = log.len(), "Last replayed shot struck");
                self.finishing = true;
                None
            }
        }
    }

    fn animate_cue(
        &mut self,
        cue_ball: Vec2,
        shot: Vec2,
        pull: f32,
        offset: f32,
        times: [f32; 4],
    ) -> CueAnimation {
        let heading = shot.try_normalize().unwrap_or(Vec2::X);
        let rest = cue_ball - heading * offset;
        let drawn = cue_ball - heading * (offset + pull);
        let start = self.cue_tip.unwrap_or(rest);
        self.cue_tip = Some(rest);

        let keyframes = [start, rest, drawn, rest]
            .into_iter()
            .zip(times)
            .map(|(position, time)| CueKeyframe { time, position })
            .collect();

        CueAnimation {
            yaw: heading.y.atan2(heading.x),
            keyframes,
        }
    }
}
