//! Table state and authoritative simulation loop
//!
//! Each table is one task. It owns the physics world, the seats and the
//! shot log, so every write to ball state happens on that task. Physics
//! sub-steps and observation ticks only run while the table is in motion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use glam::Vec2;
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::store::GameStore;
use crate::util::time::unix_millis;
use crate::ws::protocol::{BallPose, ClientMsg, ServerMsg, SoundCue};

use super::ball::{BallId, BLACK_BALL};
use super::physics::{BodyLabel, TableWorld};
use super::replay::{ReplayEngine, ReplayPhase};
use super::scheduler::{DeferredTask, Scheduler, TaskKind};
use super::scoring::{analyze, PlayerScore};
use super::session::{GameSession, SeatId, Seats};
use super::shot::{ShotController, ShotRequest};
use super::simulation::{BallExit, Simulation};
use super::snapshot::SnapshotLog;
use super::{InputEvent, PlayerInput};

/// Recorded variants per audio cue
const SOUND_VARIANTS: u8 = 3;

/// A server message and who should get it
#[derive(Debug, Clone)]
pub struct TableEvent {
    /// `None` goes to every connection at the table
    pub target: Option<Uuid>,
    pub msg: ServerMsg,
}

impl TableEvent {
    pub fn is_for(&self, connection_id: Uuid) -> bool {
        self.target.map_or(true, |t| t == connection_id)
    }
}

/// Seat occupancy as seen from outside the table task
type SeatBoard = Arc<RwLock<BTreeMap<SeatId, String>>>;

/// Handle to a running table
#[derive(Clone)]
pub struct TableHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub events_tx: broadcast::Sender<TableEvent>,
    pub connections: Arc<AtomicUsize>,
    seats: SeatBoard,
}

impl TableHandle {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> TableSummary {
        let seated = self.seats.read();
        TableSummary {
            id: self.id,
            seats: SeatId::all()
                .map(|seat| SeatSummary {
                    seat,
                    player: seated.get(&seat).cloned(),
                })
                .collect(),
            connections: self.connection_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub id: Uuid,
    pub seats: Vec<SeatSummary>,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatSummary {
    pub seat: SeatId,
    pub player: Option<String>,
}

/// Registry of all open tables
pub struct TableRegistry {
    tables: DashMap<Uuid, TableHandle>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Create a table and spawn its loop
    pub fn open<S: GameStore>(&self, sim: SimConfig, store: S) -> Uuid {
        let id = Uuid::new_v4();
        let (table, handle) = PoolTable::new(id, sim, store, rand::random());
        self.insert(handle);
        tokio::spawn(table.run());
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<TableHandle> {
        self.tables.get(id).map(|t| t.value().clone())
    }

    pub fn insert(&self, handle: TableHandle) {
        self.tables.insert(handle.id, handle);
    }

    pub fn active_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn total_seated(&self) -> usize {
        self.tables.iter().map(|t| t.value().seats.read().len()).sum()
    }

    /// Every table, ordered by id
    pub fn summaries(&self) -> Vec<TableSummary> {
        let mut tables: Vec<TableSummary> = self.tables.iter().map(|t| t.value().summary()).collect();
        tables.sort_by_key(|t| t.id);
        tables
    }

    /// Table used when a client does not ask for one
    pub fn default_table(&self) -> Option<TableHandle> {
        self.tables
            .iter()
            .min_by_key(|t| *t.key())
            .map(|t| t.value().clone())
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence result fed back into the table loop
#[derive(Debug)]
enum StoreOutcome {
    Saved {
        connection_id: Uuid,
        label: String,
        result: Result<(), String>,
    },
    Loaded {
        connection_id: Uuid,
        label: String,
        session_id: Uuid,
        result: Result<Option<String>, String>,
    },
}

/// The authoritative pool table
pub struct PoolTable<S: GameStore> {
    id: Uuid,
    sim: Simulation<TableWorld>,
    session: GameSession,
    seats: Seats,
    shots: ShotController,
    replay: ReplayEngine,
    scheduler: Scheduler,
    rng: ChaCha8Rng,
    store: S,
    input_rx: mpsc::Receiver<PlayerInput>,
    events_tx: broadcast::Sender<TableEvent>,
    outcome_tx: mpsc::Sender<StoreOutcome>,
    outcome_rx: mpsc::Receiver<StoreOutcome>,
    seat_board: SeatBoard,
}

impl<S: GameStore> PoolTable<S> {
    /// Create a racked table
    pub fn new(id: Uuid, sim: SimConfig, store: S, seed: u64) -> (Self, TableHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let (outcome_tx, outcome_rx) = mpsc::channel(16);
        let seat_board = SeatBoard::default();

        let handle = TableHandle {
            id,
            input_tx,
            events_tx: events_tx.clone(),
            connections: Arc::new(AtomicUsize::new(0)),
            seats: seat_board.clone(),
        };

        let table = Self {
            id,
            sim: Simulation::new(TableWorld::new(&sim), sim),
            session: GameSession::new(),
            seats: Seats::new(),
            shots: ShotController::new(),
            replay: ReplayEngine::new(),
            scheduler: Scheduler::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            store,
            input_rx,
            events_tx,
            outcome_tx,
            outcome_rx,
            seat_board,
        };

        (table, handle)
    }

    /// Run the table until its input channel closes
    pub async fn run(mut self) {
        info!(table_id = %self.id, session_id = %self.session.session_id, "Table open");

        let mut physics_tick = interval(self.sim.config().physics_interval());
        physics_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut observe_tick = interval(self.sim.config().observation_interval());
        observe_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let running = self.sim.is_running();
            let deadline = self.scheduler.next_deadline();

            tokio::select! {
                _ = physics_tick.tick(), if running => self.sim.substep(),
                _ = observe_tick.tick(), if running => self.observe(unix_millis()),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.run_due(Instant::now());
                }
                input = self.input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
                Some(outcome) = self.outcome_rx.recv() => self.handle_outcome(outcome),
            }
        }

        self.flush_removals();
        self.scheduler.cancel_all();
        info!(table_id = %self.id, "Table closed");
    }

    fn broadcast(&self, msg: ServerMsg) {
        let _ = self.events_tx.send(TableEvent { target: None, msg });
    }

    fn send_to(&self, connection_id: Uuid, msg: ServerMsg) {
        let _ = self.events_tx.send(TableEvent {
            target: Some(connection_id),
            msg,
        });
    }

    fn handle_input(&mut self, input: PlayerInput) {
        let PlayerInput {
            connection_id,
            name,
            event,
            received_at,
        } = input;

        let msg = match event {
            InputEvent::Connected => return self.handle_connect(connection_id),
            InputEvent::Disconnected => return self.handle_leave(connection_id),
            InputEvent::Message(msg) => msg,
        };

        match msg {
            ClientMsg::Reset | ClientMsg::Save { .. } | ClientMsg::Load { .. } | ClientMsg::Replay
                if self.seats.seat_of(connection_id).is_none() =>
            {
                debug!(table_id = %self.id, connection_id = %connection_id, "Menu action from unseated connection ignored");
            }
            ClientMsg::JoinSeat { seat } => self.handle_join(connection_id, &name, seat),
            ClientMsg::LeaveSeat => self.handle_leave(connection_id),
            ClientMsg::Aim { direction, reach } => self.handle_aim(connection_id, direction, reach),
            ClientMsg::Fire {
                direction,
                pull_distance,
                reach,
            } => self.handle_fire(connection_id, direction, pull_distance, reach, received_at),
            ClientMsg::Reset => self.reset(),
            ClientMsg::Save { label } => self.save(connection_id, label),
            ClientMsg::Load { label } => self.load(connection_id, label),
            ClientMsg::Replay => self.start_replay(connection_id),
            ClientMsg::Ping { t } => self.send_to(connection_id, ServerMsg::Pong { t }),
        }
    }

    /// Bring a new connection up to date
    fn handle_connect(&mut self, connection_id: Uuid) {
        for msg in self.spawn_messages() {
            self.send_to(connection_id, msg);
        }
        for seat in SeatId::all() {
            let occupant = self.seats.occupant(seat).map(|o| o.name.clone());
            self.send_to(connection_id, ServerMsg::SeatChanged { seat, occupant });
        }
        self.send_to(
            connection_id,
            ServerMsg::ReplayState {
                phase: self.replay.phase(),
                step: None,
            },
        );
    }

    fn handle_join(&mut self, connection_id: Uuid, name: &str, seat: SeatId) {
        if !self.seats.join(seat, connection_id, name) {
            debug!(table_id = %self.id, seat = %seat, "Seat unavailable");
            return;
        }
        info!(table_id = %self.id, seat = %seat, player = %name, "Player seated");
        self.sync_seat_board();
        self.broadcast(ServerMsg::SeatChanged {
            seat,
            occupant: Some(name.to_string()),
        });
    }

    fn handle_leave(&mut self, connection_id: Uuid) {
        let Some(seat) = self.seats.leave(connection_id) else {
            return;
        };
        info!(table_id = %self.id, seat = %seat, "Player left seat");
        self.sync_seat_board();
        self.broadcast(ServerMsg::SeatChanged { seat, occupant: None });
        self.broadcast(ServerMsg::AimIndicator {
            seat,
            visible: false,
            yaw: 0.0,
        });
    }

    fn sync_seat_board(&self) {
        *self.seat_board.write() = self.seats.participants();
    }

    fn handle_aim(&mut self, connection_id: Uuid, direction: Vec2, reach: f32) {
        let Some(seat) = self.seats.seat_of(connection_id) else {
            return;
        };
        if self.replay.is_replaying() {
            return;
        }
        let visible = reach.is_finite() && reach <= self.sim.config().max_reach && direction.is_finite();
        let yaw = if visible { direction.y.atan2(direction.x) } else { 0.0 };
        self.broadcast(ServerMsg::AimIndicator { seat, visible, yaw });
    }

    fn handle_fire(
        &mut self,
        connection_id: Uuid,
        direction: Vec2,
        pull_distance: f32,
        reach: f32,
        now_ms: u64,
    ) {
        let Some(seat) = self.seats.seat_of(connection_id) else {
            debug!(table_id = %self.id, connection_id = %connection_id, "Shot from unseated connection ignored");
            return;
        };
        if self.replay.is_replaying() {
            debug!(table_id = %self.id, seat = %seat, "Shot ignored during replay");
            return;
        }

        let request = ShotRequest {
            seat,
            direction,
            pull_distance,
            reach,
        };
        if self
            .shots
            .fire(&mut self.sim, &mut self.session, &request, now_ms)
            .is_some()
        {
            self.play(SoundCue::CueStrike);
            self.broadcast(ServerMsg::AimIndicator {
                seat,
                visible: false,
                yaw: 0.0,
            });
        }
    }

    /// One observation tick
    fn observe(&mut self, now_ms: u64) {
        let obs = self.sim.observe(now_ms);
        let removal_delay = self.sim.config().removal_delay;

        self.broadcast(ServerMsg::Poses {
            poses: obs
                .poses
                .iter()
                .map(|(ball, position)| BallPose {
                    ball: *ball,
                    position: self.sim.config().to_display(*position),
                })
                .collect(),
        });

        for (a, b) in &obs.collisions {
            if let Some(cue) = sound_for(*a, *b) {
                self.play(cue);
            }
        }

        let mut black_down = false;
        for exit in obs.exits {
            match exit {
                BallExit::Removed {
                    ball,
                    body,
                    placement,
                } => {
                    info!(table_id = %self.id, ball = %ball, ?placement, "Ball out of play");
                    let displaced = self
                        .scheduler
                        .schedule(Instant::now() + removal_delay, DeferredTask::RemoveBody { ball, body });
                    // a ball can leave twice within one delay; drop the older body now
                    if let Some(DeferredTask::RemoveBody { body: old, .. }) = displaced {
                        self.sim.remove_body(old);
                    }
                    self.broadcast(ServerMsg::BallDestroyed {
                        ball,
                        placement: Some(placement),
                        delay_ms: removal_delay.as_millis() as u64,
                    });
                    black_down |= ball == BLACK_BALL;
                }
                BallExit::CueReset { placement } => {
                    info!(table_id = %self.id, ?placement, "Cue ball reset");
                    self.broadcast(ServerMsg::BallDestroyed {
                        ball: BallId::Cue,
                        placement: Some(placement),
                        delay_ms: 0,
                    });
                    self.broadcast(ServerMsg::BallSpawned {
                        ball: BallId::Cue,
                        color: BallId::Cue.color(),
                        position: self.sim.config().to_display(self.sim.config().cue_start),
                    });
                }
            }
        }

        if black_down {
            self.evaluate_game_over();
        }

        if obs.settled {
            debug!(table_id = %self.id, "Table settled");
            if self.replay.is_finishing() {
                self.replay.stop();
                info!(table_id = %self.id, "Replay finished");
                self.broadcast(ServerMsg::ReplayState {
                    phase: ReplayPhase::Live,
                    step: None,
                });
            }
        }
    }

    fn play(&mut self, cue: SoundCue) {
        let variant = self.rng.gen_range(0..SOUND_VARIANTS);
        self.broadcast(ServerMsg::Sound { cue, variant });
    }

    /// Close the session and score it. Runs at most once per session and
    /// never while replaying.
    fn evaluate_game_over(&mut self) {
        if self.replay.is_replaying() {
            return;
        }
        let Some(closed) = self.session.close(self.seats.participants()) else {
            debug!(table_id = %self.id, "Game already closed");
            return;
        };

        let scores = analyze(&closed);
        info!(
            table_id = %self.id,
            game_id = %closed.game_id,
            shots = closed.snapshots.len(),
            scored = scores.is_some(),
            "Game over"
        );
        if let Some(scores) = &scores {
            self.submit(closed.game_id.clone(), scores.clone());
        }
        self.broadcast(ServerMsg::GameOver {
            game_id: closed.game_id,
            scores,
        });
    }

    fn submit(&self, game_id: String, scores: Vec<PlayerScore>) {
        let store = self.store.clone();
        let table_id = self.id;
        tokio::spawn(async move {
            if let Err(e) = store.submit_game_result(&game_id, &scores).await {
                error!(table_id = %table_id, game_id = %game_id, error = %e, "Failed to submit game result");
            }
        });
    }

    fn run_due(&mut self, now: Instant) {
        for task in self.scheduler.drain_due(now) {
            match task {
                DeferredTask::RemoveBody { ball, body } => {
                    if self.sim.remove_body(body) {
                        debug!(table_id = %self.id, ball = %ball, "Body removed");
                    }
                }
                DeferredTask::ReplayStrike { index } => self.replay_strike(index, now),
                DeferredTask::ReplayStep { index } => self.replay_step(index, now),
            }
        }
    }

    /// Run pending body removals now
    fn flush_removals(&mut self) {
        for task in self.scheduler.take_kind(TaskKind::RemoveBody) {
            if let DeferredTask::RemoveBody { body, .. } = task {
                self.sim.remove_body(body);
            }
        }
    }

    fn start_replay(&mut self, connection_id: Uuid) {
        if !self.replay.start(self.session.snapshots()) {
            debug!(table_id = %self.id, "Replay not started");
            if self.session.snapshots().is_empty() {
                self.send_to(connection_id, ServerMsg::error("nothing_to_replay", "No shots recorded"));
            }
            return;
        }
        self.replay_step(0, Instant::now());
    }

    fn replay_step(&mut self, index: usize, now: Instant) {
        self.flush_removals();
        let Some(step) = self
            .replay
            .begin_step(index, &mut self.sim, self.session.snapshots())
        else {
            self.broadcast(ServerMsg::ReplayState {
                phase: self.replay.phase(),
                step: None,
            });
            return;
        };

        for ball in &step.removed {
            self.broadcast(ServerMsg::BallDestroyed {
                ball: *ball,
                placement: None,
                delay_ms: 0,
            });
        }
        for ball in &step.restored {
            if let Some(k) = self.sim.ball_kinematics(*ball) {
                self.broadcast(ServerMsg::BallSpawned {
                    ball: *ball,
                    color: ball.color(),
                    position: self.sim.config().to_display(k.position),
                });
            }
        }
        self.broadcast(ServerMsg::Poses {
            poses: self.board_poses(),
        });
        self.broadcast(ServerMsg::CueStick {
            animation: step.animation,
        });
        self.broadcast(ServerMsg::ReplayState {
            phase: ReplayPhase::Replaying,
            step: Some(index),
        });

        self.scheduler
            .schedule(now + step.strike_after, DeferredTask::ReplayStrike { index });
    }

    fn replay_strike(&mut self, index: usize, now: Instant) {
        let next = self
            .replay
            .strike(index, &mut self.sim, self.session.snapshots());
        if !self.replay.is_replaying() {
            return;
        }
        self.play(SoundCue::CueStrike);
        if let Some(delay) = next {
            self.scheduler
                .schedule(now + delay, DeferredTask::ReplayStep { index: index + 1 });
        }
    }

    /// Re-rack and start a new session. Seats are kept.
    fn reset(&mut self) {
        self.flush_removals();
        self.scheduler.cancel_all();
        self.replay.stop();
        self.sim.rerack();
        self.session = GameSession::new();
        self.shots.reset();

        info!(table_id = %self.id, session_id = %self.session.session_id, "Table reset");

        self.broadcast(ServerMsg::ReplayState {
            phase: ReplayPhase::Live,
            step: None,
        });
        for msg in self.spawn_messages() {
            self.broadcast(msg);
        }
    }

    fn save(&mut self, connection_id: Uuid, label: String) {
        let payload = match self.session.snapshots().to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(table_id = %self.id, error = %e, "Failed to serialize shot log");
                return;
            }
        };

        let store = self.store.clone();
        let tx = self.outcome_tx.clone();
        let session_id = self.session.session_id;
        tokio::spawn(async move {
            let result = store
                .save_game(&label, session_id, payload)
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(StoreOutcome::Saved {
                    connection_id,
                    label,
                    result,
                })
                .await;
        });
    }

    fn load(&mut self, connection_id: Uuid, label: String) {
        if self.replay.is_replaying() {
            warn!(table_id = %self.id, label = %label, "Load refused during replay");
            self.send_to(connection_id, ServerMsg::error("replay_in_progress", "Cannot load during a replay"));
            return;
        }

        let store = self.store.clone();
        let tx = self.outcome_tx.clone();
        let session_id = self.session.session_id;
        tokio::spawn(async move {
            let result = store
                .load_game(&label, session_id)
                .await
                .map_err(|e| e.to_string());
            let _ = tx
                .send(StoreOutcome::Loaded {
                    connection_id,
                    label,
                    session_id,
                    result,
                })
                .await;
        });
    }

    fn handle_outcome(&mut self, outcome: StoreOutcome) {
        match outcome {
            StoreOutcome::Saved {
                connection_id,
                label,
                result,
            } => match result {
                Ok(()) => {
                    info!(table_id = %self.id, label = %label, "Game saved");
                    self.send_to(connection_id, ServerMsg::Saved { label });
                }
                Err(e) => {
                    error!(table_id = %self.id, label = %label, error = %e, "Failed to save game");
                    self.send_to(connection_id, ServerMsg::error("save_failed", e));
                }
            },
            StoreOutcome::Loaded {
                connection_id,
                label,
                session_id,
                result,
            } => self.apply_loaded(connection_id, label, session_id, result),
        }
    }

    /// Replace the shot log with a loaded one. Anything short of a fully
    /// valid payload leaves the current log as it was.
    fn apply_loaded(
        &mut self,
        connection_id: Uuid,
        label: String,
        session_id: Uuid,
        result: Result<Option<String>, String>,
    ) {
        if session_id != self.session.session_id {
            debug!(table_id = %self.id, label = %label, "Load for a previous session dropped");
            return;
        }
        if self.replay.is_replaying() {
            warn!(table_id = %self.id, label = %label, "Load refused during replay");
            self.send_to(connection_id, ServerMsg::error("replay_in_progress", "Cannot load during a replay"));
            return;
        }

        let payload = match result {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(table_id = %self.id, label = %label, "Saved game not found");
                self.send_to(connection_id, ServerMsg::error("not_found", format!("No saved game '{}'", label)));
                return;
            }
            Err(e) => {
                error!(table_id = %self.id, label = %label, error = %e, "Failed to load game");
                self.send_to(connection_id, ServerMsg::error("load_failed", e));
                return;
            }
        };

        match SnapshotLog::from_json(&payload) {
            Ok(log) => {
                let shots = log.len();
                self.session.replace_log(log);
                info!(table_id = %self.id, label = %label, shots, "Game loaded");
                self.broadcast(ServerMsg::Loaded { label, shots });
            }
            Err(e) => {
                warn!(table_id = %self.id, label = %label, error = %e, "Rejected saved game");
                self.send_to(connection_id, ServerMsg::error("invalid_save", e.to_string()));
            }
        }
    }

    fn board_poses(&self) -> Vec<BallPose> {
        self.sim
            .board_state()
            .iter()
            .map(|b| BallPose {
                ball: b.name,
                position: self.sim.config().to_display(b.position),
            })
            .collect()
    }

    fn spawn_messages(&self) -> Vec<ServerMsg> {
        self.board_poses()
            .into_iter()
            .map(|pose| ServerMsg::BallSpawned {
                ball: pose.ball,
                color: pose.ball.color(),
                position: pose.position,
            })
            .collect()
    }
}

fn sound_for(a: BodyLabel, b: BodyLabel) -> Option<SoundCue> {
    match (a, b) {
        (BodyLabel::Ball(_), BodyLabel::Ball(_)) => Some(SoundCue::BallClick),
        (BodyLabel::Ball(_), BodyLabel::Wall) | (BodyLabel::Wall, BodyLabel::Ball(_)) => Some(SoundCue::RailHit),
        (BodyLabel::Wall, BodyLabel::Wall) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{Kinematics, PhysicsEngine};
    use crate::game::snapshot::tests::snap;
    use crate::store::MemoryGameStore;
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct Harness {
        table: PoolTable<MemoryGameStore>,
        store: MemoryGameStore,
        events: broadcast::Receiver<TableEvent>,
        alice: Uuid,
        bob: Uuid,
    }

    fn harness() -> Harness {
        let store = MemoryGameStore::new();
        let (table, handle) = PoolTable::new(Uuid::new_v4(), SimConfig::default(), store.clone(), 7);
        Harness {
            table,
            store,
            events: handle.events_tx.subscribe(),
            alice: Uuid::new_v4(),
            bob: Uuid::new_v4(),
        }
    }

    fn send(h: &mut Harness, connection_id: Uuid, msg: ClientMsg, received_at: u64) {
        let name = if connection_id == h.alice { "alice" } else { "bob" };
        h.table.handle_input(PlayerInput {
            connection_id,
            name: name.to_string(),
            event: InputEvent::Message(msg),
            received_at,
        });
    }

    fn seat_both(h: &mut Harness) {
        let (alice, bob) = (h.alice, h.bob);
        send(h, alice, ClientMsg::JoinSeat { seat: SeatId(0) }, 0);
        send(h, bob, ClientMsg::JoinSeat { seat: SeatId(1) }, 0);
    }

    fn drain(h: &mut Harness) -> Vec<TableEvent> {
        let mut out = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn fire(reach: f32) -> ClientMsg {
        ClientMsg::Fire {
            direction: Vec2::new(1.0, 0.0),
            pull_distance: 0.2,
            reach,
        }
    }

    fn pot_black(h: &mut Harness) {
        let pocket = h.table.sim.table().pockets()[1].center;
        h.table.sim.force_ball(BLACK_BALL, Kinematics::at(pocket));
        h.table.observe(unix_millis());
    }

    fn presence(h: &Harness) -> BTreeSet<BallId> {
        h.table.sim.balls().live().map(|b| b.id).collect()
    }

    /// Tick the table until a finishing replay hands back to live play
    fn finish_replay(h: &mut Harness) {
        let per_tick = (h.table.sim.config().physics_hz / h.table.sim.config().observation_hz) as usize;
        for tick in 0..30 * 120 {
            if !h.table.replay.is_replaying() {
                break;
            }
            for _ in 0..per_tick {
                h.table.sim.substep();
            }
            h.table.observe(tick as u64 * 33);
        }
    }

    async fn let_tasks_run() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn seats_are_exclusive_and_menu_needs_a_seat() {
        let mut h = harness();
        let session = h.table.session.session_id;
        let alice = h.alice;

        send(&mut h, alice, ClientMsg::Reset, 0);
        assert_eq!(h.table.session.session_id, session, "unseated reset ignored");

        send(&mut h, alice, ClientMsg::JoinSeat { seat: SeatId(0) }, 0);
        let bob = h.bob;
        send(&mut h, bob, ClientMsg::JoinSeat { seat: SeatId(0) }, 0);
        assert_eq!(h.table.seats.len(), 1);
        assert_eq!(h.table.seat_board.read().get(&SeatId(0)).map(String::as_str), Some("alice"));

        send(&mut h, alice, ClientMsg::Reset, 0);
        assert_ne!(h.table.session.session_id, session);

        h.table.handle_input(PlayerInput {
            connection_id: alice,
            name: "alice".into(),
            event: InputEvent::Disconnected,
            received_at: 0,
        });
        assert!(h.table.seats.is_empty());
        assert!(h.table.seat_board.read().is_empty());
    }

    #[test]
    fn accepted_shot_records_and_plays_strike() {
        let mut h = harness();
        seat_both(&mut h);
        drain(&mut h);
        let alice = h.alice;

        send(&mut h, alice, fire(1.21), 1_000);
        assert!(h.table.session.snapshots().is_empty());
        assert!(!h.table.sim.is_running());

        send(&mut h, alice, fire(1.19), 1_000);
        assert_eq!(h.table.session.snapshots().len(), 1);
        assert!(h.table.sim.is_running());

        let events = drain(&mut h);
        assert!(events.iter().any(|e| matches!(
            e.msg,
            ServerMsg::Sound {
                cue: SoundCue::CueStrike,
                ..
            }
        )));
    }

    #[test]
    fn unseated_connections_cannot_shoot() {
        let mut h = harness();
        let bob = h.bob;
        send(&mut h, bob, fire(0.5), 0);
        assert!(h.table.session.snapshots().is_empty());
    }

    #[test]
    fn connect_sends_board_to_that_connection_only() {
        let mut h = harness();
        let alice = h.alice;
        h.table.handle_input(PlayerInput {
            connection_id: alice,
            name: "alice".into(),
            event: InputEvent::Connected,
            received_at: 0,
        });
        let events = drain(&mut h);
        assert!(events.iter().all(|e| e.target == Some(alice)));
        assert!(events.iter().all(|e| !e.is_for(h.bob)));
        let spawned = events
            .iter()
            .filter(|e| matches!(e.msg, ServerMsg::BallSpawned { .. }))
            .count();
        assert_eq!(spawned, 16);
    }

    #[tokio::test]
    async fn black_ball_closes_the_game_once() {
        let mut h = harness();
        seat_both(&mut h);
        h.table.session.record(snap(0, 0, &BallId::all().collect::<Vec<_>>()));
        h.table.session.record(snap(1, 900, &BallId::all().filter(|b| *b != BallId::Object(3)).collect::<Vec<_>>()));
        drain(&mut h);

        pot_black(&mut h);
        let game_id = h.table.session.game_id().map(str::to_string).expect("closed");

        // second evaluation for the same session is refused
        pot_black(&mut h);
        h.table.evaluate_game_over();
        assert_eq!(h.table.session.game_id(), Some(game_id.as_str()));

        let_tasks_run().await;
        assert_eq!(h.store.games_recorded(), 1);

        let game_overs: Vec<_> = drain(&mut h)
            .into_iter()
            .filter_map(|e| match e.msg {
                ServerMsg::GameOver { game_id, scores } => Some((game_id, scores)),
                _ => None,
            })
            .collect();
        assert_eq!(game_overs.len(), 1);
        assert_eq!(game_overs[0].0, game_id);
        assert_eq!(game_overs[0].1.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn single_player_game_is_not_scored() {
        let mut h = harness();
        let alice = h.alice;
        send(&mut h, alice, ClientMsg::JoinSeat { seat: SeatId(0) }, 0);
        h.table.session.record(snap(0, 0, &BallId::all().collect::<Vec<_>>()));

        pot_black(&mut h);
        assert!(h.table.session.is_closed());

        let_tasks_run().await;
        assert_eq!(h.store.games_recorded(), 0);
    }

    #[test]
    fn replay_steps_follow_the_log_and_block_live_input() {
        let mut h = harness();
        seat_both(&mut h);
        let all: Vec<BallId> = BallId::all().collect();
        let fewer: Vec<BallId> = all
            .iter()
            .copied()
            .filter(|b| !matches!(b, BallId::Object(2 | 9)))
            .collect();
        h.table.session.record(snap(0, 0, &all));
        h.table.session.record(snap(1, 200, &fewer));
        let alice = h.alice;

        let t0 = Instant::now();
        send(&mut h, alice, ClientMsg::Replay, 0);
        assert!(h.table.replay.is_replaying());
        assert_eq!(presence(&h), all.iter().copied().collect());

        // live input is suspended
        send(&mut h, alice, fire(0.5), 5_000);
        assert_eq!(h.table.session.snapshots().len(), 2);
        send(&mut h, alice, ClientMsg::Replay, 0);
        send(&mut h, alice, ClientMsg::Load { label: "x".into() }, 0);
        assert!(h.table.replay.is_replaying());

        // strike 0, then step 1 after its recorded delay
        h.table.run_due(t0 + Duration::from_secs(2));
        assert!(h.table.sim.is_running());
        h.table.run_due(t0 + Duration::from_secs(20));
        assert_eq!(presence(&h), fewer.iter().copied().collect());

        // last strike, then the replay ends once the table settles
        h.table.run_due(t0 + Duration::from_secs(30));
        assert!(h.table.replay.is_finishing());
        finish_replay(&mut h);
        assert_eq!(h.table.replay.phase(), ReplayPhase::Live);
        assert!(!h.table.session.is_closed(), "a replay never scores");
    }

    #[test]
    fn loaded_log_replaces_only_when_valid() {
        let mut h = harness();
        let alice = h.alice;
        let session_id = h.table.session.session_id;
        h.table.session.record(snap(0, 0, &[BallId::Cue]));
        let before = h.table.session.snapshots().clone();

        h.table
            .apply_loaded(alice, "bad".into(), session_id, Ok(Some("{\"not\":\"a log\"}".into())));
        assert_eq!(h.table.session.snapshots(), &before);
        h.table.apply_loaded(alice, "gone".into(), session_id, Ok(None));
        assert_eq!(h.table.session.snapshots(), &before);
        h.table.apply_loaded(alice, "err".into(), session_id, Err("boom".into()));
        assert_eq!(h.table.session.snapshots(), &before);

        let saved = SnapshotLog::from(vec![snap(1, 0, &[BallId::Cue]), snap(0, 10, &[BallId::Cue])]);
        h.table
            .apply_loaded(alice, "stale".into(), Uuid::new_v4(), Ok(Some(saved.to_json().unwrap())));
        assert_eq!(h.table.session.snapshots(), &before);

        h.table
            .apply_loaded(alice, "good".into(), session_id, Ok(Some(saved.to_json().unwrap())));
        assert_eq!(h.table.session.snapshots(), &saved);
        assert_eq!(h.table.replay.phase(), ReplayPhase::Live, "loading does not start playback");
    }

    #[test]
    fn replaying_a_log_without_the_cue_keeps_the_table_playable() {
        let mut h = harness();
        seat_both(&mut h);
        let alice = h.alice;
        let session_id = h.table.session.session_id;
        let saved = SnapshotLog::from(vec![snap(0, 0, &[BallId::Object(1), BallId::Object(5)])]);
        h.table
            .apply_loaded(alice, "slot".into(), session_id, Ok(Some(saved.to_json().unwrap())));

        let t0 = Instant::now();
        send(&mut h, alice, ClientMsg::Replay, 0);
        assert!(!h.table.sim.balls().is_removed(BallId::Cue));
        h.table.run_due(t0 + Duration::from_secs(2));
        finish_replay(&mut h);
        assert_eq!(h.table.replay.phase(), ReplayPhase::Live);
        assert!(!h.table.sim.balls().is_removed(BallId::Cue));

        send(&mut h, alice, fire(0.5), 10_000);
        assert_eq!(h.table.session.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_the_store() {
        let mut h = harness();
        seat_both(&mut h);
        let alice = h.alice;
        send(&mut h, alice, fire(0.5), 1_000);
        send(&mut h, alice, fire(0.5), 2_500);
        let recorded = h.table.session.snapshots().clone();

        send(&mut h, alice, ClientMsg::Save { label: "slot".into() }, 0);
        let outcome = h.table.outcome_rx.recv().await.expect("save outcome");
        h.table.handle_outcome(outcome);

        h.table.session.replace_log(SnapshotLog::new());
        send(&mut h, alice, ClientMsg::Load { label: "slot".into() }, 0);
        let outcome = h.table.outcome_rx.recv().await.expect("load outcome");
        h.table.handle_outcome(outcome);

        assert_eq!(h.table.session.snapshots(), &recorded);
        let events = drain(&mut h);
        assert!(events.iter().any(|e| matches!(&e.msg, ServerMsg::Saved { label } if label == "slot")));
        assert!(events.iter().any(|e| matches!(&e.msg, ServerMsg::Loaded { shots: 2, .. })));
    }

    #[test]
    fn reset_cancels_pending_work_and_reracks() {
        let mut h = harness();
        seat_both(&mut h);
        let pocket = h.table.sim.table().pockets()[0].center;
        h.table.sim.force_ball(BallId::Object(4), Kinematics::at(pocket));
        h.table.sim.wake();
        h.table.observe(0);
        assert!(!h.table.scheduler.is_empty(), "removal pending");

        let alice = h.alice;
        send(&mut h, alice, ClientMsg::Reset, 0);
        assert!(h.table.scheduler.is_empty());
        assert_eq!(presence(&h).len(), 16);
        assert!(!h.table.sim.is_running());
        let walls = h.table.sim.table().walls().len();
        assert_eq!(h.table.sim.physics().body_count(), walls + 16);
        assert_eq!(h.table.seats.len(), 2, "seats survive a reset");
        assert_eq!(h.table.sim.physics().body_speeds().len(), walls + 16);
    }

    #[test]
    fn collisions_map_to_audio_cues() {
        let ball = BodyLabel::Ball(BallId::Cue);
        assert_eq!(sound_for(ball, ball), Some(SoundCue::BallClick));
        assert_eq!(sound_for(BodyLabel::Wall, ball), Some(SoundCue::RailHit));
        assert_eq!(sound_for(ball, BodyLabel::Wall), Some(SoundCue::RailHit));
        assert_eq!(sound_for(BodyLabel::Wall, BodyLabel::Wall), None);
    }
}
