pub mod chat;
pub mod eval;
pub mod ingest;
pub mod sessions;

use axum::{
    extract::DefaultBodyLimit,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::AppState;

const UPLOAD_BODY_LIMIT: usize = 50 * 1024 * 1024;

const INDEX_HTML: &str = include_str!("../../static/index.html");

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "carebot" }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route(
            "/api/upload",
            post(ingest::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/links", post(ingest::submit_link))
        .route("/api/retriever/chat", post(chat::retriever_chat))
        .route("/api/retriever/usage", get(chat::retriever_usage))
        .route("/api/history-aware/chat", post(chat::history_aware_chat))
        .route("/api/conversational/chat", post(chat::conversational_chat))
        .route("/api/agent/chat", post(chat::agent_chat))
        .route("/api/providers", get(chat::providers))
        .route("/api/sessions", post(sessions::create_session))
        .route(
            "/api/sessions/:id/:page/messages",
            get(sessions::messages).delete(sessions::clear_messages),
        )
        .route("/api/evaluation/records", get(eval::records))
        .route("/api/evaluation/leaderboard", get(eval::leaderboard))
        .route("/api/evaluation/reset", post(eval::reset))
}
