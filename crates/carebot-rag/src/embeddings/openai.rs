use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::Embedder;
use crate::http::{build_client, parse_json_response, request_error};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Largest number of inputs sent in one embeddings request.
pub const EMBEDDING_BATCH_SIZE: usize = 96;

pub struct OpenAIEmbeddings {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    endpoint: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbeddings {
    pub fn new(api_key: String, model: String, dimension: usize) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            api_key,
            model,
            dimension,
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
        })
    }

    /// Point at an OpenAI-compatible embeddings endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&self.endpoint, e))?;

        let mut payload: EmbeddingResponse = parse_json_response(response, &self.endpoint).await?;
        if payload.data.len() != batch.len() {
            return Err(anyhow!(
                "Embedding service returned {} vectors for {} inputs",
                payload.data.len(),
                batch.len()
            ));
        }

        payload.data.sort_by_key(|d| d.index);
        Ok(payload.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        tracing::debug!(model = %self.model, count = vectors.len(), "Embedded texts");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
