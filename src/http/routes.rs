//! HTTP route definitions

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::app::AppState;
use crate::game::table_match::TableSummary;
use crate::store::{GameStore, LeaderboardRow};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route("/tables", get(tables_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    store: &'static str,
    active_tables: usize,
    seated_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        store: state.store.backend(),
        active_tables: state.tables.active_tables(),
        seated_players: state.tables.total_seated(),
    })
}

// ============================================================================
// Leaderboard
// ============================================================================

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct LeaderboardResponse {
    players: Vec<LeaderboardRow>,
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    if query.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }
    let top_n = query
        .limit
        .unwrap_or(state.config.leaderboard_top_n)
        .min(state.config.leaderboard_top_n);

    let players = state.store.fetch_leaderboard(top_n).await.map_err(|e| {
        error!(error = %e, "Failed to fetch leaderboard");
        AppError::Internal("Leaderboard unavailable".to_string())
    })?;

    Ok(Json(LeaderboardResponse { players }))
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Serialize)]
struct TablesResponse {
    tables: Vec<TableSummary>,
}

async fn tables_handler(State(state): State<AppState>) -> Json<TablesResponse> {
    Json(TablesResponse {
        tables: state.tables.summaries(),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
