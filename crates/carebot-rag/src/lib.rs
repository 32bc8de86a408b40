pub mod agent;
pub mod chain;
pub mod chat;
pub mod config;
pub mod embeddings;
pub mod eval;
pub mod ingest;
pub mod llm;
pub mod processing;
pub mod storage;
pub mod types;
pub mod usage;

mod http;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience
pub use config::ChatbotConfig;
pub use types::{Document, DocumentFormat, ScoredDocument};

// Re-export chain and agent entry points
pub use agent::{AgentExecutor, AgentOutput, NoopEmitter, TokenEmitter, ToolInvocation};
pub use chain::{
    ChainFactory, ConversationalOutput, ConversationalRetrievalChain, HistoryAwareRetrievalChain,
    RetrievalChain, RetrievalOutput,
};
pub use eval::{EvalStore, FeedbackProvider, Recorder};
pub use ingest::{IngestError, LoadSummary};

// Re-export LLM types
pub use llm::{
    ApiProvider, ChatMessage, ChatResponse, ChatRole, GenerationConfig, LLMProvider, ProviderSet,
};
pub use storage::{Retriever, VectorStore};
pub use usage::{TokenUsage, UsageTracker};

// Re-export common types
pub use anyhow::{Error, Result};
