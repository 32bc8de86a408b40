use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use carebot_rag::eval::{LeaderboardRow, Record};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub app_id: Option<String>,
}

pub async fn records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordsQuery>,
) -> Json<Vec<Record>> {
    Json(state.evaluations.records(query.app_id.as_deref()))
}

pub async fn leaderboard(State(state): State<Arc<AppState>>) -> Json<Vec<LeaderboardRow>> {
    Json(state.evaluations.leaderboard())
}

pub async fn reset(State(state): State<Arc<AppState>>) -> StatusCode {
    state.evaluations.reset();
    tracing::info!("Evaluation records cleared");
    StatusCode::NO_CONTENT
}
