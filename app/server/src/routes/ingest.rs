use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use carebot_rag::ingest::{populate_vector_store, scrape_link, IngestError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResult {
    pub file: String,
    pub ok: bool,
    pub message: String,
    pub chunks: usize,
}

impl UploadResult {
    fn failed(file: String, message: String) -> Self {
        Self {
            file,
            ok: false,
            message,
            chunks: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadReply {
    pub results: Vec<UploadResult>,
}

/// Every file part is processed independently; one failure does not stop the rest.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadReply>> {
    let mut results = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(file) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                // The multipart stream cannot be resumed after a broken field.
                tracing::warn!(file = %file, "Upload truncated: {}", e);
                results.push(UploadResult::failed(file.clone(), format!("Failed to read {}: {}", file, e)));
                break;
            }
        };

        let store = state.chains.store();
        let result = match populate_vector_store(store.as_ref(), &state.splitter, &file, &bytes).await {
            Ok(chunks) => UploadResult {
                message: format!("Processed file {}. You may ask me questions about the file now.", file),
                file,
                ok: true,
                chunks,
            },
            Err(e) => {
                tracing::warn!(file = %file, "Upload failed: {}", e);
                UploadResult::failed(file, e.to_string())
            }
        };
        results.push(result);
    }

    if results.is_empty() {
        return Err(ApiError::BadRequest("Upload a file".to_string()));
    }
    Ok(Json(UploadReply { results }))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkReply {
    pub message: String,
    pub chunks: usize,
}

pub async fn submit_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkRequest>,
) -> ApiResult<Json<LinkReply>> {
    let store = state.chains.store();
    match scrape_link(store.as_ref(), &state.splitter, &state.scraper, &request.url).await {
        Ok(chunks) => Ok(Json(LinkReply {
            message: "Link successfully scraped and processed!".to_string(),
            chunks,
        })),
        Err(IngestError::EmptyLink) => Err(ApiError::BadRequest(IngestError::EmptyLink.to_string())),
        Err(e) => Err(ApiError::Upstream(format!("Failed to scrape link: {}", e))),
    }
}
