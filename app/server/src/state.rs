use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use carebot_rag::embeddings::{Embedder, HashingEmbedder, OpenAIEmbeddings};
use carebot_rag::eval::{EvalStore, FeedbackProvider, Recorder};
use carebot_rag::processing::{RecursiveTextSplitter, WebScraper};
use carebot_rag::storage::{AstraVectorStore, InMemoryVectorStore, VectorStore};
use carebot_rag::{ChainFactory, ChatbotConfig, ProviderSet};

use crate::session::SessionStore;

/// Shared by every request handler.
pub struct AppState {
    pub config: ChatbotConfig,
    pub chains: ChainFactory,
    pub splitter: RecursiveTextSplitter,
    pub scraper: WebScraper,
    pub sessions: SessionStore,
    pub evaluations: Arc<EvalStore>,
    pub recorder: Recorder,
}

impl AppState {
    pub fn new(config: ChatbotConfig, store: Arc<dyn VectorStore>, providers: ProviderSet) -> Result<Self> {
        let evaluations = Arc::new(EvalStore::new());
        let feedback = providers.evaluator().map(FeedbackProvider::new);
        if feedback.is_none() {
            tracing::warn!("No evaluator model configured; conversational calls will not be graded");
        }

        Ok(Self {
            splitter: RecursiveTextSplitter::from_config(&config.chunking),
            scraper: WebScraper::new(&config.scrape)?,
            sessions: SessionStore::new(
                config.history.max_messages,
                Duration::from_secs(config.server.session_idle_secs),
                config.server.max_sessions,
            ),
            recorder: Recorder::new(evaluations.clone(), feedback),
            evaluations,
            chains: ChainFactory::new(store, providers, config.clone()),
            config,
        })
    }
}

/// Periodically drop idle sessions for as long as the server runs.
pub fn spawn_session_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.config.server.session_idle_secs.clamp(1, 300));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let evicted = state.sessions.evict_idle(chrono::Utc::now());
            if evicted > 0 {
                tracing::info!(evicted, remaining = state.sessions.len(), "Expired idle sessions");
            }
        }
    })
}

/// OpenAI embeddings when a key is configured, the local hashing embedder otherwise.
pub fn build_embedder(config: &ChatbotConfig) -> Result<Arc<dyn Embedder>> {
    match &config.secrets.openai_api_key {
        Some(key) => Ok(Arc::new(OpenAIEmbeddings::new(
            key.clone(),
            config.models.embedding.clone(),
            config.models.embedding_dimension,
        )?)),
        None => {
            tracing::warn!("OPENAI_API_KEY not set; using local hashing embeddings");
            Ok(Arc::new(HashingEmbedder::new(config.models.embedding_dimension)))
        }
    }
}

/// Astra DB when credentials are configured, an in-process store otherwise.
pub async fn build_store(config: &ChatbotConfig) -> Result<Arc<dyn VectorStore>> {
    let embedder = build_embedder(config)?;

    if !config.astra.is_configured() {
        tracing::warn!("Astra DB credentials not set; documents are kept in memory only");
        return Ok(Arc::new(InMemoryVectorStore::new(embedder)));
    }

    let store = AstraVectorStore::new(&config.astra, embedder)?;
    store
        .initialize()
        .await
        .context("Failed to initialize Astra DB collection")?;
    tracing::info!(
        keyspace = %config.astra.keyspace,
        collection = %config.astra.collection,
        "Connected to Astra DB"
    );
    Ok(Arc::new(store))
}

pub async fn build_state(config: ChatbotConfig) -> Result<Arc<AppState>> {
    let store = build_store(&config).await?;
    let providers = ProviderSet::from_config(&config)?;
    tracing::info!(providers = ?providers.available(), store = store.name(), "Chatbot ready");
    Ok(Arc::new(AppState::new(config, store, providers)?))
}
