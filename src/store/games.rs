//! Game results, leaderboard and saved games on Supabase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::scoring::PlayerScore;

use super::supabase::SupabaseClient;
use super::{GameStore, LeaderboardRow, StoreError};

const RESULTS_TABLE: &str = "game_results";
const STATS_TABLE: &str = "player_stats";
const SAVES_TABLE: &str = "saved_games";

/// One scored game
#[derive(Debug, Clone, Serialize)]
struct NewGameResult<'a> {
    game_id: &'a str,
    players: &'a [PlayerScore],
    finished_at: DateTime<Utc>,
}

/// Saved shot log row
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedGame {
    label: String,
    session_id: Uuid,
    payload: String,
    saved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SavedPayload {
    payload: String,
}

/// Supabase-backed game store
#[derive(Clone)]
pub struct SupabaseGameStore {
    client: SupabaseClient,
}

impl SupabaseGameStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn player_stats(&self, name: &str) -> Result<Option<LeaderboardRow>, StoreError> {
        self.client
            .get_one(STATS_TABLE, &[("name", format!("eq.{}", name))])
            .await
    }
}

impl GameStore for SupabaseGameStore {
    async fn submit_game_result(&self, game_id: &str, scores: &[PlayerScore]) -> Result<(), StoreError> {
        let existing: Vec<serde_json::Value> = self
            .client
            .get(
                RESULTS_TABLE,
                &[("select", "game_id".to_string()), ("game_id", format!("eq.{}", game_id))],
            )
            .await?;
        if !existing.is_empty() {
            return Err(StoreError::Duplicate(game_id.to_string()));
        }

        self.client
            .insert(
                RESULTS_TABLE,
                &NewGameResult {
                    game_id,
                    players: scores,
                    finished_at: Utc::now(),
                },
            )
            .await?;

        for score in scores {
            let mut row = self
                .player_stats(&score.player_name)
                .await?
                .unwrap_or_else(|| LeaderboardRow::new(&score.player_name));
            row.record(score);
            self.client.upsert(STATS_TABLE, &row, "name").await?;
            debug!(player = %row.name, pots = row.pots, wins = row.wins, "Player stats updated");
        }

        info!(game_id = %game_id, players = scores.len(), "Game result stored");
        Ok(())
    }

    async fn fetch_leaderboard(&self, top_n: usize) -> Result<Vec<LeaderboardRow>, StoreError> {
        self.client
            .get(
                STATS_TABLE,
                &[
                    ("select", "*".to_string()),
                    ("order", "pots.desc,name.asc".to_string()),
                    ("limit", top_n.to_string()),
                ],
            )
            .await
    }

    async fn save_game(&self, label: &str, session_id: Uuid, payload: String) -> Result<(), StoreError> {
        let row = SavedGame {
            label: label.to_string(),
            session_id,
            payload,
            saved_at: Utc::now(),
        };
        self.client.upsert(SAVES_TABLE, &row, "label,session_id").await
    }

    async fn load_game(&self, label: &str, session_id: Uuid) -> Result<Option<String>, StoreError> {
        let row: Option<SavedPayload> = self
            .client
            .get_one(
                SAVES_TABLE,
                &[
                    ("select", "payload".to_string()),
                    ("label", format!("eq.{}", label)),
                    ("session_id", format!("eq.{}", session_id)),
                ],
            )
            .await?;
        Ok(row.map(|r| r.payload))
    }
}
