//! Astra DB Data API client (JSON commands over HTTPS).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{check_metadata_len, VectorStore};
use crate::config::AstraConfig;
use crate::embeddings::Embedder;
use crate::http::{build_client, parse_json_response, request_error};
use crate::types::{Document, ScoredDocument};

/// Documents per `insertMany` command; the Data API caps batches at 20.
pub const INSERT_BATCH_SIZE: usize = 20;

pub struct AstraVectorStore {
    client: reqwest::Client,
    token: String,
    keyspace_url: String,
    collection_url: String,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl AstraVectorStore {
    pub fn new(config: &AstraConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let token = config
            .application_token
            .clone()
            .ok_or_else(|| anyhow!("ASTRA_DB_APPLICATION_TOKEN is not set"))?;
        let endpoint = config
            .endpoint()
            .ok_or_else(|| anyhow!("Set ASTRA_DB_API_ENDPOINT or ASTRA_DB_ID to locate the database"))?;

        let keyspace_url = format!("{}/api/json/v1/{}", endpoint, config.keyspace);
        let collection_url = format!("{}/{}", keyspace_url, config.collection);

        tracing::info!(
            endpoint = %endpoint,
            keyspace = %config.keyspace,
            collection = %config.collection,
            "Configured Astra vector store"
        );

        Ok(Self {
            client: build_client()?,
            token,
            keyspace_url,
            collection_url,
            collection: config.collection.clone(),
            embedder,
        })
    }

    /// Create the collection if needed. Safe to call on every start.
    pub async fn initialize(&self) -> Result<()> {
        let body = create_collection_command(&self.collection, self.embedder.dimension());
        self.command(&self.keyspace_url, &body)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection))?;
        Ok(())
    }

    async fn command(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .header("Token", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let payload: Value = parse_json_response(response, url).await?;
        check_errors(&payload)?;
        Ok(payload)
    }
}

pub(crate) fn create_collection_command(name: &str, dimension: usize) -> Value {
    json!({
        "createCollection": {
            "name": name,
            "options": {
                "vector": { "dimension": dimension, "metric": "cosine" }
            }
        }
    })
}

pub(crate) fn insert_many_command(
    ids: &[String],
    texts: &[String],
    metadatas: &[HashMap<String, String>],
    vectors: &[Vec<f32>],
) -> Value {
    let documents: Vec<Value> = ids
        .iter()
        .zip(texts)
        .zip(vectors)
        .enumerate()
        .map(|(i, ((id, text), vector))| {
            json!({
                "_id": id,
                "content": text,
                "metadata": metadatas.get(i).cloned().unwrap_or_default(),
                "$vector": vector,
            })
        })
        .collect();

    json!({
        "insertMany": {
            "documents": documents,
            "options": { "ordered": false }
        }
    })
}

pub(crate) fn find_command(vector: &[f32], k: usize) -> Value {
    json!({
        "find": {
            "sort": { "$vector": vector },
            "projection": { "content": 1, "metadata": 1 },
            "options": { "limit": k, "includeSimilarity": true }
        }
    })
}

/// Surface a Data API `errors` array as an error.
pub(crate) fn check_errors(payload: &Value) -> Result<()> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
            return Err(anyhow!("Astra DB error: {}", messages.join("; ")));
        }
    }
    Ok(())
}

pub(crate) fn parse_find_response(payload: &Value) -> Vec<ScoredDocument> {
    let Some(documents) = payload["data"]["documents"].as_array() else {
        return Vec::new();
    };

    documents
        .iter()
        .map(|doc| {
            let metadata = doc["metadata"]
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .map(|(k, v)| {
                            let value = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), value)
                        })
                        .collect()
                })
                .unwrap_or_default();

            ScoredDocument {
                document: Document {
                    page_content: doc["content"].as_str().unwrap_or_default().to_string(),
                    metadata,
                },
                score: doc["$similarity"].as_f64().unwrap_or(0.0) as f32,
            }
        })
        .collect()
}

#[async_trait]
impl VectorStore for AstraVectorStore {
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
        let ids: Vec<String> = texts.iter().map(|_| Uuid::new_v4().simple().to_string()).collect();

        for start in (0..texts.len()).step_by(INSERT_BATCH_SIZE) {
            let end = (start + INSERT_BATCH_SIZE).min(texts.len());
            let batch_meta = if metadatas.is_empty() {
                &[][..]
            } else {
                &metadatas[start..end]
            };
            let body = insert_many_command(
                &ids[start..end],
                &texts[start..end],
                batch_meta,
                &vectors[start..end],
            );
            self.command(&self.collection_url, &body)
                .await
                .with_context(|| format!("insertMany failed for documents {}..{}", start, end))?;
        }

        tracing::info!(collection = %self.collection, inserted = ids.len(), "Inserted documents");
        Ok(ids)
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        let vector = self.embedder.embed_query(query).await?;
        let payload = self
            .command(&self.collection_url, &find_command(&vector, k))
            .await
            .context("Vector search failed")?;
        Ok(parse_find_response(&payload))
    }

    async fn count(&self) -> Result<usize> {
        let payload = self
            .command(&self.collection_url, &json!({ "countDocuments": {} }))
            .await?;
        Ok(payload["status"]["count"].as_u64().unwrap_or(0) as usize)
    }

    fn name(&self) -> &str {
        "astra"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_collection_uses_cosine() {
        let cmd = create_collection_command("general", 1536);
        assert_eq!(cmd["createCollection"]["name"], "general");
        assert_eq!(cmd["createCollection"]["options"]["vector"]["dimension"], 1536);
        assert_eq!(cmd["createCollection"]["options"]["vector"]["metric"], "cosine");
    }

    #[test]
    fn test_insert_many_shape() {
        let ids = vec!["1".to_string(), "2".to_string()];
        let texts = vec!["flu".to_string(), "cold".to_string()];
        let vectors = vec![vec![0.1, 0.2], vec![0.3, 0.4]];
        let cmd = insert_many_command(&ids, &texts, &[], &vectors);

        let docs = cmd["insertMany"]["documents"].as_array().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["_id"], "2");
        assert_eq!(docs[1]["content"], "cold");
        assert!(docs[0]["metadata"].as_object().unwrap().is_empty());
        assert_eq!(docs[0]["$vector"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_find_request_and_response() {
        let cmd = find_command(&[0.5, 0.5], 4);
        assert_eq!(cmd["find"]["options"]["limit"], 4);
        assert_eq!(cmd["find"]["options"]["includeSimilarity"], true);

        let payload = json!({
            "data": {
                "documents": [
                    {"_id": "a", "content": "Asthma overview", "metadata": {"source": "asthma.md", "page": 2}, "$similarity": 0.91},
                    {"_id": "b", "content": "Flu overview", "$similarity": 0.5}
                ],
                "nextPageState": null
            }
        });
        let hits = parse_find_response(&payload);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.source(), Some("asthma.md"));
        assert_eq!(hits[0].document.metadata.get("page").map(String::as_str), Some("2"));
        assert!((hits[0].score - 0.91).abs() < 1e-6);
        assert!(hits[1].document.metadata.is_empty());
    }

    #[test]
    fn test_errors_array_is_surfaced() {
        let payload = json!({"errors": [{"message": "Collection does not exist", "errorCode": "COLLECTION_NOT_EXIST"}]});
        let err = check_errors(&payload).unwrap_err();
        assert!(err.to_string().contains("Collection does not exist"));
        assert!(check_errors(&json!({"status": {"ok": 1}})).is_ok());
    }

    #[test]
    fn test_new_requires_credentials() {
        let embedder = Arc::new(crate::embeddings::HashingEmbedder::default());
        let config = AstraConfig::default();
        assert!(AstraVectorStore::new(&config, embedder).is_err());
    }
}
