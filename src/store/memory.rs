//! In-process game store, used when Supabase is not configured

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::game::scoring::PlayerScore;

use super::{GameStore, LeaderboardRow, StoreError};

#[derive(Default)]
struct Inner {
    games: HashSet<String>,
    stats: HashMap<String, LeaderboardRow>,
    saves: HashMap<(String, Uuid), String>,
}

#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of results submitted so far
    pub fn games_recorded(&self) -> usize {
        self.inner.lock().games.len()
    }
}

impl GameStore for MemoryGameStore {
    async fn submit_game_result(&self, game_id: &str, scores: &[PlayerScore]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.games.insert(game_id.to_string()) {
            return Err(StoreError::Duplicate(game_id.to_string()));
        }
        for score in scores {
            inner
                .stats
                .entry(score.player_name.clone())
                .or_insert_with(|| LeaderboardRow::new(&score.player_name))
                .record(score);
        }
        Ok(())
    }

    async fn fetch_leaderboard(&self, top_n: usize) -> Result<Vec<LeaderboardRow>, StoreError> {
        let mut rows: Vec<LeaderboardRow> = self.inner.lock().stats.values().cloned().collect();
        rows.sort_by(|a, b| b.pots.cmp(&a.pots).then_with(|| a.name.cmp(&b.name)));
        rows.truncate(top_n);
        Ok(rows)
    }

    async fn save_game(&self, label: &str, session_id: Uuid, payload: String) -> Result<(), StoreError> {
        self.inner
            .lock()
            .saves
            .insert((label.to_string(), session_id), payload);
        Ok(())
    }

    async fn load_game(&self, label: &str, session_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .saves
            .get(&(label.to_string(), session_id))
            .cloned())
    }
}
