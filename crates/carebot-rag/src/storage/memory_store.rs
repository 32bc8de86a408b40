use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{check_metadata_len, VectorStore};
use crate::embeddings::Embedder;
use crate::types::{Document, ScoredDocument};

struct Entry {
    id: String,
    document: Document,
    vector: Vec<f32>,
}

/// Brute-force cosine store held in process memory.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn documents(&self) -> Vec<Document> {
        self.entries.read().iter().map(|e| e.document.clone()).collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_texts(
        &self,
        texts: Vec<String>,
        metadatas: Vec<HashMap<String, String>>,
    ) -> Result<Vec<String>> {
        check_metadata_len(&texts, &metadatas)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(anyhow!("Embedder returned {} vectors for {} texts", vectors.len(), texts.len()));
        }

        let mut metadatas = metadatas.into_iter();
        let mut ids = Vec::with_capacity(texts.len());
        let mut entries = self.entries.write();
        for (text, vector) in texts.into_iter().zip(vectors) {
            let id = Uuid::new_v4().to_string();
            entries.push(Entry {
                id: id.clone(),
                document: Document {
                    page_content: text,
                    metadata: metadatas.next().unwrap_or_default(),
                },
                vector,
            });
            ids.push(id);
        }

        Ok(ids)
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        let query_vector = self.embedder.embed_query(query).await?;

        let entries = self.entries.read();
        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&query_vector, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredDocument {
                document: entries[i].document.clone(),
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().len())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("InMemoryVectorStore")
            .field("len", &entries.len())
            .field("ids", &entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::storage::Retriever;

    fn store() -> Arc<InMemoryVectorStore> {
        Arc::new(InMemoryVectorStore::new(Arc::new(HashingEmbedder::default())))
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = store();
        store
            .add_texts(
                vec![
                    "Asthma causes wheezing and shortness of breath".to_string(),
                    "Diabetes raises blood sugar levels".to_string(),
                    "Migraine headaches cause throbbing pain".to_string(),
                ],
                Vec::new(),
            )
            .await
            .unwrap();

        let hits = store.similarity_search("blood sugar diabetes", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].document.page_content.starts_with("Diabetes"));
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_metadata_must_match_texts() {
        let store = store();
        let result = store
            .add_texts(
                vec!["a".to_string(), "b".to_string()],
                vec![HashMap::from([("source".to_string(), "x".to_string())])],
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_retriever_returns_k_documents_with_metadata() {
        let store = store();
        let docs = (0..6)
            .map(|i| Document::new(format!("fever note {}", i)).with_metadata("source", format!("f{}.md", i)))
            .collect();
        store.add_documents(docs).await.unwrap();

        let retriever = Retriever::new(store.clone(), 4);
        let found = retriever.retrieve("fever").await.unwrap();
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|d| d.source().is_some()));
    }
}
