use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::prompts::{render, RETRIEVER_SYSTEM_PROMPT};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::storage::{join_documents, Retriever};
use crate::types::Document;
use crate::usage::TokenUsage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub input: String,
    /// Query actually sent to the vector store.
    pub search_query: String,
    pub context: Vec<Document>,
    pub answer: String,
    pub usage: TokenUsage,
}

/// Retrieve, stuff the documents into the system prompt, answer.
pub struct RetrievalChain {
    llm: Arc<dyn LLMProvider>,
    retriever: Retriever,
    generation: GenerationConfig,
}

impl RetrievalChain {
    pub fn new(llm: Arc<dyn LLMProvider>, retriever: Retriever, generation: GenerationConfig) -> Self {
        Self {
            llm,
            retriever,
            generation,
        }
    }

    pub async fn invoke(&self, input: &str) -> Result<RetrievalOutput> {
        let context = self
            .retriever
            .retrieve(input)
            .await
            .context("Document retrieval failed")?;

        let (answer, usage) = answer_with_context(
            self.llm.as_ref(),
            &self.generation,
            &context,
            &[],
            input,
        )
        .await?;

        Ok(RetrievalOutput {
            input: input.to_string(),
            search_query: input.to_string(),
            context,
            answer,
            usage,
        })
    }
}

/// System prompt with stuffed context, then `history`, then the input.
pub(crate) async fn answer_with_context(
    llm: &dyn LLMProvider,
    generation: &GenerationConfig,
    context: &[Document],
    history: &[ChatMessage],
    input: &str,
) -> Result<(String, TokenUsage)> {
    let system = render(RETRIEVER_SYSTEM_PROMPT, &[("context", &join_documents(context))]);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(input));

    let completion = llm
        .chat(&messages, &[], generation)
        .await
        .context("Chat completion failed")?;

    Ok((completion.response.content().to_string(), completion.usage))
}
