use anyhow::{Context, Result};
use std::sync::Arc;

use super::prompts::SEARCH_QUERY_PROMPT;
use super::retrieval::{answer_with_context, RetrievalOutput};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::storage::Retriever;
use crate::usage::TokenUsage;

/// Retrieval chain that first rewrites the input into a standalone search
/// query using the conversation so far.
pub struct HistoryAwareRetrievalChain {
    llm: Arc<dyn LLMProvider>,
    retriever: Retriever,
    generation: GenerationConfig,
}

impl HistoryAwareRetrievalChain {
    pub fn new(llm: Arc<dyn LLMProvider>, retriever: Retriever, generation: GenerationConfig) -> Self {
        Self {
            llm,
            retriever,
            generation,
        }
    }

    /// `history` holds the turns before `input`.
    pub async fn invoke(&self, input: &str, history: &[ChatMessage]) -> Result<RetrievalOutput> {
        let mut usage = TokenUsage::default();

        let search_query = if history.is_empty() {
            input.to_string()
        } else {
            let mut messages = history.to_vec();
            messages.push(ChatMessage::user(input));
            messages.push(ChatMessage::user(SEARCH_QUERY_PROMPT));

            let completion = self
                .llm
                .chat(&messages, &[], &self.generation)
                .await
                .context("Search query generation failed")?;
            usage += &completion.usage;

            let rewritten = completion.response.content().trim().to_string();
            if rewritten.is_empty() {
                input.to_string()
            } else {
                rewritten
            }
        };
        tracing::debug!(query = %search_query, "History-aware search query");

        let context = self
            .retriever
            .retrieve(&search_query)
            .await
            .context("Document retrieval failed")?;

        let (answer, answer_usage) =
            answer_with_context(self.llm.as_ref(), &self.generation, &context, history, input).await?;
        usage += &answer_usage;

        Ok(RetrievalOutput {
            input: input.to_string(),
            search_query,
            context,
            answer,
            usage,
        })
    }
}
