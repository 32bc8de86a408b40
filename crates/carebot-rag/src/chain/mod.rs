//! Retrieval chains over the healthcare vector store.

pub mod conversational;
pub mod history_aware;
pub mod prompts;
pub mod retrieval;

pub use conversational::{ConversationalOutput, ConversationalRetrievalChain};
pub use history_aware::HistoryAwareRetrievalChain;
pub use retrieval::{RetrievalChain, RetrievalOutput};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentExecutor, RetrieverTool, ToolLoopConfig, ToolRegistry};
use crate::config::ChatbotConfig;
use crate::llm::{ApiProvider, GenerationConfig, ProviderSet};
use crate::storage::{Retriever, VectorStore};

/// Builds chains and agents from the shared store, providers and config.
#[derive(Clone)]
pub struct ChainFactory {
    store: Arc<dyn VectorStore>,
    providers: ProviderSet,
    config: ChatbotConfig,
}

impl ChainFactory {
    pub fn new(store: Arc<dyn VectorStore>, providers: ProviderSet, config: ChatbotConfig) -> Self {
        Self {
            store,
            providers,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn config(&self) -> &ChatbotConfig {
        &self.config
    }

    fn retriever(&self, k: usize) -> Retriever {
        Retriever::new(self.store.clone(), k)
    }

    fn generation(&self) -> GenerationConfig {
        GenerationConfig::from(&self.config)
    }

    pub fn retrieval_chain(&self) -> Result<RetrievalChain> {
        Ok(RetrievalChain::new(
            self.providers.get(ApiProvider::OpenAI)?,
            self.retriever(self.config.retrieval.default_k),
            self.generation(),
        ))
    }

    pub fn history_aware_chain(&self) -> Result<HistoryAwareRetrievalChain> {
        Ok(HistoryAwareRetrievalChain::new(
            self.providers.get(ApiProvider::OpenAI)?,
            self.retriever(self.config.retrieval.default_k),
            self.generation(),
        ))
    }

    pub fn conversational_chain(&self, provider: ApiProvider) -> Result<ConversationalRetrievalChain> {
        Ok(ConversationalRetrievalChain::new(
            self.providers.get(provider)?,
            self.retriever(self.config.retrieval.default_k),
            self.generation(),
            self.config.conversational.max_tokens_limit,
        ))
    }

    pub fn agent_executor(&self) -> Result<AgentExecutor> {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RetrieverTool::new(
            self.retriever(self.config.retrieval.agent_k),
        )));

        let loop_config = ToolLoopConfig {
            max_iterations: self.config.agent.max_iterations,
            tool_timeout: Duration::from_secs(self.config.agent.tool_timeout_secs),
        };

        Ok(AgentExecutor::new(
            self.providers.get(ApiProvider::OpenAI)?,
            Arc::new(tools),
            self.generation(),
            loop_config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_store, ScriptedLLM};
    use crate::types::Document;

    #[tokio::test]
    async fn test_factory_requires_configured_provider() {
        let store = seeded_store(Vec::new()).await;
        let factory = ChainFactory::new(store, ProviderSet::new(), ChatbotConfig::default());

        let err = factory.retrieval_chain().err().unwrap();
        assert!(err.to_string().contains("No API key configured for OpenAI"));
        assert!(factory.conversational_chain(ApiProvider::Google).is_err());
    }

    #[tokio::test]
    async fn test_conversational_chain_uses_selected_provider() {
        let store = seeded_store(vec![Document::new("Measles causes a fever and rash.")]).await;
        let google = ScriptedLLM::text(&["from google"]);
        let openai = ScriptedLLM::text(&["from openai"]);
        let providers = ProviderSet::new()
            .with_provider(ApiProvider::OpenAI, openai.clone())
            .with_provider(ApiProvider::Google, google.clone());
        let factory = ChainFactory::new(store, providers, ChatbotConfig::default());

        let chain = factory.conversational_chain(ApiProvider::Google).unwrap();
        let output = chain
            .invoke("What does measles cause?", &crate::chat::ExchangeHistory::new(25))
            .await
            .unwrap();

        assert_eq!(output.answer, "from google");
        assert_eq!(openai.request_count(), 0);
        assert_eq!(google.request_count(), 1);
    }
}
