//! Cancellable deferred tasks for one table
//!
//! Delayed body removal and replay pacing are queued here instead of being
//! spawned as free-running timers. The table loop sleeps until
//! [`Scheduler::next_deadline`] and then runs whatever [`Scheduler::drain_due`]
//! hands back. Resetting the table cancels the whole set at once.

use tokio::time::Instant;

use super::ball::BallId;
use super::physics::BodyHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    RemoveBody,
    ReplayStrike,
    ReplayStep,
}

/// Work to run once its deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    /// Drop a ball's detached body from the world after its exit animation
    RemoveBody { ball: BallId, body: BodyHandle },
    /// Apply the recorded shot of replay step `index`
    ReplayStrike { index: usize },
    /// Begin replay step `index`
    ReplayStep { index: usize },
}

impl DeferredTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            DeferredTask::RemoveBody { .. } => TaskKind::RemoveBody,
            DeferredTask::ReplayStrike { .. } => TaskKind::ReplayStrike,
            DeferredTask::ReplayStep { .. } => TaskKind::ReplayStep,
        }
    }

    fn ball(&self) -> Option<BallId> {
        match self {
            DeferredTask::RemoveBody { ball, .. } => Some(*ball),
            _ => None,
        }
    }
}

/// Identity of a pending task; scheduling the same key again replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub session: u64,
    pub kind: TaskKind,
    pub ball: Option<BallId>,
}

#[derive(Debug)]
struct Pending {
    due: Instant,
    key: TaskKey,
    task: DeferredTask,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    session: u64,
    pending: Vec<Pending>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn key_of(&self, task: &DeferredTask) -> TaskKey {
        TaskKey {
            session: self.session,
            kind: task.kind(),
            ball: task.ball(),
        }
    }

    /// Queue `task`, returning the pending task it displaced, if any
    pub fn schedule(&mut self, due: Instant, task: DeferredTask) -> Option<DeferredTask> {
        let key = self.key_of(&task);
        let displaced = self
            .pending
            .iter()
            .position(|p| p.key == key)
            .map(|i| self.pending.swap_remove(i).task);
        self.pending.push(Pending { due, key, task });
        displaced
    }

    /// Remove and return every pending task of one kind regardless of its
    /// deadline, so it can be run early
    pub fn take_kind(&mut self, kind: TaskKind) -> Vec<DeferredTask> {
        let session = self.session;
        let mut taken = Vec::new();
        self.pending.retain(|p| {
            if p.key.kind != kind {
                return true;
            }
            if p.key.session == session {
                taken.push(p.task);
            }
            false
        });
        taken
    }

    /// Drop every pending task and bump the session epoch
    pub fn cancel_all(&mut self) {
        self.pending.clear();
        self.session += 1;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.due).min()
    }

    /// Remove and return every task due at `now`, earliest first.
    /// Tasks from an earlier session are discarded, never returned.
    pub fn drain_due(&mut self, now: Instant) -> Vec<DeferredTask> {
        let session = self.session;
        let mut due: Vec<Pending> = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].due <= now {
                due.push(self.pending.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|p| p.due);
        due.into_iter()
            .filter(|p| p.key.session == session)
            .map(|p| p.task)
            .collect()
    }
}
