//! Vector store clients.
//!
//! Similarity search always runs inside the store; this crate only pushes
//! `(text, metadata)` pairs in and asks for the nearest `k` back.

pub mod astra_store;
pub mod memory_store;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Document, ScoredDocument};

pub use astra_store::AstraVectorStore;
pub use memory_store::InMemoryVectorStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and insert texts. `metadatas` is either empty or one map per text.
    /// Returns the ids assigned to the inserted documents.
    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Vec<HashMap<String, String>>,
    ) -> Result<Vec<String>>;

    async fn add_documents(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        let (texts, metadatas) = docs
            .into_iter()
            .map(|d| (d.page_content, d.metadata))
            .unzip();
        self.add_texts(texts, metadatas).await
    }

    /// The `k` stored documents most similar to `query`, best first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>>;

    async fn count(&self) -> Result<usize>;

    fn name(&self) -> &str;
}

pub(crate) fn check_metadata_len(
    texts: &[String],
    metadatas: &[HashMap<String, String>],
) -> Result<()> {
    if !metadatas.is_empty() && metadatas.len() != texts.len() {
        return Err(anyhow!(
            "Got {} metadata entries for {} texts",
            metadatas.len(),
            texts.len()
        ));
    }
    Ok(())
}

/// Fixed-`k` view over a vector store.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, k: usize) -> Self {
        Self { store, k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let hits = self.store.similarity_search(query, self.k).await?;
        tracing::debug!(store = self.store.name(), k = self.k, hits = hits.len(), "Retrieved documents");
        Ok(hits.into_iter().map(|hit| hit.document).collect())
    }
}

/// Page contents joined the way stuffed prompts expect them.
pub fn join_documents(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| d.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
