pub mod hashing;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

pub use hashing::HashingEmbedder;
pub use openai::OpenAIEmbeddings;

/// Turns text into vectors for the vector store.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Batch embed documents for ingestion
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding service returned no vector for query"))
    }

    /// Embedding vector dimension
    fn dimension(&self) -> usize;
}
