//! Carebot server: the browser UI plus the JSON/SSE API behind it.

pub mod error;
pub mod routes;
pub mod session;
pub mod state;

use anyhow::anyhow;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{build_state, build_store, spawn_session_sweeper, AppState};

use carebot_rag::ChatbotConfig;

/// Config file (when given) or defaults, overlaid with the environment.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ChatbotConfig> {
    let mut config = match path {
        Some(path) => ChatbotConfig::from_file(path).map_err(|e| anyhow!(e))?,
        None => ChatbotConfig::default(),
    };
    config.apply_env();
    config.validate().map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
