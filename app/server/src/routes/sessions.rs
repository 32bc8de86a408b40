use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::session::{Page, TranscriptEntry};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionReply {
    pub session_id: Uuid,
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionReply> {
    Json(SessionReply {
        session_id: state.sessions.resolve(None),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptReply {
    pub session_id: Uuid,
    pub page: Page,
    pub messages: Vec<TranscriptEntry>,
}

fn parse_path(id: &str, page: &str) -> ApiResult<(Uuid, Page)> {
    let id = Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid session id: {}", id)))?;
    let page = page.parse::<Page>().map_err(ApiError::NotFound)?;
    Ok((id, page))
}

pub async fn messages(
    State(state): State<Arc<AppState>>,
    Path((id, page)): Path<(String, String)>,
) -> ApiResult<Json<TranscriptReply>> {
    let (session_id, page) = parse_path(&id, &page)?;
    let messages = state
        .sessions
        .transcript(session_id, page)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown session: {}", session_id)))?;

    Ok(Json(TranscriptReply {
        session_id,
        page,
        messages,
    }))
}

pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path((id, page)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (session_id, page) = parse_path(&id, &page)?;
    if state.sessions.clear_page(session_id, page) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Unknown session: {}", session_id)))
    }
}
