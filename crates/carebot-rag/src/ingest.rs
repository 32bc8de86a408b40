//! Getting uploads, scraped links and bulk healthcare data into the vector store.

use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

use crate::processing::{link_as_source, load_bytes, load_json, RecursiveTextSplitter, WebScraper};
use crate::storage::VectorStore;
use crate::types::Document;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Error occurred in loader {loader}: {message}")]
    Load { loader: &'static str, message: String },

    #[error("Please enter a link")]
    EmptyLink,

    #[error("{0:#}")]
    Scrape(anyhow::Error),

    #[error("Failed to store documents: {0:#}")]
    Store(anyhow::Error),
}

/// Load an uploaded file, split it and add the chunks to `store`.
/// Returns the number of chunks stored.
pub async fn populate_vector_store(
    store: &dyn VectorStore,
    splitter: &RecursiveTextSplitter,
    file_name: &str,
    bytes: &[u8],
) -> Result<usize, IngestError> {
    let docs = load_bytes(file_name, bytes)?;
    let mut chunks = splitter.split_documents(&docs);
    for chunk in &mut chunks {
        chunk.metadata.insert("source".to_string(), file_name.to_string());
    }

    store_chunks(store, chunks).await
}

/// Scrape `url`, split the article text and add the chunks with
/// `source = url`. Returns the number of chunks stored.
pub async fn scrape_link(
    store: &dyn VectorStore,
    splitter: &RecursiveTextSplitter,
    scraper: &WebScraper,
    url: &str,
) -> Result<usize, IngestError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IngestError::EmptyLink);
    }

    let article = scraper.scrape(url).await.map_err(IngestError::Scrape)?;
    if article.text.trim().is_empty() {
        tracing::warn!(url, "Scraped page has no article text");
    }

    let chunks = splitter
        .split_text(&article.text)
        .into_iter()
        .map(|chunk| Document::new(chunk).with_metadata("source", url))
        .collect();

    store_chunks(store, chunks).await
}

async fn store_chunks(store: &dyn VectorStore, chunks: Vec<Document>) -> Result<usize, IngestError> {
    let count = chunks.len();
    if count == 0 {
        return Ok(0);
    }
    store.add_documents(chunks).await.map_err(IngestError::Store)?;
    tracing::info!(chunks = count, store = store.name(), "Stored chunks");
    Ok(count)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub files_loaded: usize,
    pub files_failed: usize,
    pub documents: usize,
}

/// Bulk-load every JSON file under `dir`. Each array element becomes one
/// unsplit document whose `source` is the record's `link`. Failing files
/// are logged and skipped.
pub async fn load_healthcare_dir(store: &dyn VectorStore, dir: &Path) -> anyhow::Result<LoadSummary> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut summary = LoadSummary::default();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if !entry.file_type().is_file() || !is_json {
            continue;
        }

        match load_healthcare_file(store, path).await {
            Ok(count) => {
                tracing::info!(file = %path.display(), documents = count, "Loaded file");
                summary.files_loaded += 1;
                summary.documents += count;
            }
            Err(e) => {
                tracing::error!(file = %path.display(), "Error occurred in loader JsonLoader: {:#}", e);
                summary.files_failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn load_healthcare_file(store: &dyn VectorStore, path: &Path) -> anyhow::Result<usize> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let source = path.display().to_string();
    let docs = load_json(&source, &bytes, Some(link_as_source)).map_err(anyhow::Error::msg)?;
    let count = docs.len();
    if count > 0 {
        store.add_documents(docs).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrapeConfig;
    use crate::testing::seeded_store;

    #[tokio::test]
    async fn test_upload_chunks_carry_file_name() {
        let store = seeded_store(Vec::new()).await;
        let splitter = RecursiveTextSplitter::new(40, 0);
        let md = "# Hypertension\n\nHigh blood pressure often has no symptoms.\n\nIt raises the risk of stroke.";

        let stored = populate_vector_store(store.as_ref(), &splitter, "bp.md", md.as_bytes())
            .await
            .unwrap();

        assert!(stored >= 2);
        assert_eq!(store.count().await.unwrap(), stored);
        assert!(store.documents().iter().all(|d| d.source() == Some("bp.md")));
    }

    #[tokio::test]
    async fn test_unsupported_upload_stores_nothing() {
        let store = seeded_store(Vec::new()).await;
        let err = populate_vector_store(store.as_ref(), &RecursiveTextSplitter::default(), "notes.docx", b"x")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Unsupported file type: .docx");
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_link_is_rejected() {
        let store = seeded_store(Vec::new()).await;
        let scraper = WebScraper::new(&ScrapeConfig::default()).unwrap();

        let err = scrape_link(store.as_ref(), &RecursiveTextSplitter::default(), &scraper, "  ")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Please enter a link");
    }

    #[tokio::test]
    async fn test_unreachable_link_is_a_scrape_error() {
        let store = seeded_store(Vec::new()).await;
        let config = ScrapeConfig {
            politeness_delay_ms: 0,
            timeout_secs: 2,
            ..ScrapeConfig::default()
        };
        let scraper = WebScraper::new(&config).unwrap();

        let err = scrape_link(store.as_ref(), &RecursiveTextSplitter::default(), &scraper, "http://127.0.0.1:1/")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Scrape(_)));
        assert!(err.to_string().contains("Error occurred while fetching article at http://127.0.0.1:1/"));
    }

    #[tokio::test]
    async fn test_healthcare_dir_uses_link_as_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"[{"title": "Asthma", "link": "https://example.org/asthma"}, {"title": "Gout", "link": "https://example.org/gout"}]"#,
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.json"), r#"{"not": "an array"}"#).unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let store = seeded_store(Vec::new()).await;
        let summary = load_healthcare_dir(store.as_ref(), dir.path()).await.unwrap();

        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.documents, 2);
        let sources: Vec<_> = store
            .documents()
            .iter()
            .map(|d| d.source().unwrap_or_default().to_string())
            .collect();
        assert!(sources.contains(&"https://example.org/asthma".to_string()));
    }
}
