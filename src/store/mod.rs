//! Persistence for game results, the leaderboard and saved shot logs
//!
//! Tables never wait on these calls. They spawn them and log failures.

pub mod games;
pub mod memory;
pub mod supabase;

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::game::scoring::PlayerScore;

pub use games::SupabaseGameStore;
pub use memory::MemoryGameStore;
pub use supabase::SupabaseClient;

/// Aggregate stats for one player name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub name: String,
    pub shots: u32,
    pub pots: u32,
    pub games: u32,
    pub wins: u32,
}

impl LeaderboardRow {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shots: 0,
            pots: 0,
            games: 0,
            wins: 0,
        }
    }

    /// Fold one game's result into the running totals
    pub fn record(&mut self, score: &PlayerScore) {
        self.shots += score.shots_taken;
        self.pots += score.pots;
        self.games += 1;
        if score.is_winner {
            self.wins += 1;
        }
    }
}

/// Persistence collaborator used by the tables
pub trait GameStore: Clone + Send + Sync + 'static {
    fn submit_game_result(
        &self,
        game_id: &str,
        scores: &[PlayerScore],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Top `top_n` players by pots, highest first
    fn fetch_leaderboard(
        &self,
        top_n: usize,
    ) -> impl Future<Output = Result<Vec<LeaderboardRow>, StoreError>> + Send;

    /// Store a serialized shot log; saving the same key again overwrites it
    fn save_game(
        &self,
        label: &str,
        session_id: Uuid,
        payload: String,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn load_game(
        &self,
        label: &str,
        session_id: Uuid,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;
}

/// The backend chosen at startup
#[derive(Clone)]
pub enum AnyStore {
    Supabase(SupabaseGameStore),
    Memory(MemoryGameStore),
}

impl AnyStore {
    pub fn from_config(config: &Config) -> Self {
        match &config.supabase {
            Some(supabase) => AnyStore::Supabase(SupabaseGameStore::new(SupabaseClient::new(supabase))),
            None => {
                tracing::warn!("Supabase not configured, games are kept in memory");
                AnyStore::Memory(MemoryGameStore::new())
            }
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            AnyStore::Supabase(_) => "supabase",
            AnyStore::Memory(_) => "memory",
        }
    }
}

impl GameStore for AnyStore {
    async fn submit_game_result(&self, game_id: &str, scores: &[PlayerScore]) -> Result<(), StoreError> {
        match self {
            AnyStore::Supabase(s) => s.submit_game_result(game_id, scores).await,
            AnyStore::Memory(s) => s.submit_game_result(game_id, scores).await,
        }
    }

    async fn fetch_leaderboard(&self, top_n: usize) -> Result<Vec<LeaderboardRow>, StoreError> {
        match self {
            AnyStore::Supabase(s) => s.fetch_leaderboard(top_n).await,
            AnyStore::Memory(s) => s.fetch_leaderboard(top_n).await,
        }
    }

    async fn save_game(&self, label: &str, session_id: Uuid, payload: String) -> Result<(), StoreError> {
        match self {
            AnyStore::Supabase(s) => s.save_game(label, session_id, payload).await,
            AnyStore::Memory(s) => s.save_game(label, session_id, payload).await,
        }
    }

    async fn load_game(&self, label: &str, session_id: Uuid) -> Result<Option<String>, StoreError> {
        match self {
            AnyStore::Supabase(s) => s.load_game(label, session_id).await,
            AnyStore::Memory(s) => s.load_game(label, session_id).await,
        }
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("Result for game {0} already submitted")]
    Duplicate(String),
}
