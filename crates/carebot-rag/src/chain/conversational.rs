use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::prompts::{render, CONDENSE_QUESTION_PROMPT, HEALTHCARE_QA_PROMPT};
use crate::chat::ExchangeHistory;
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::storage::{join_documents, Retriever};
use crate::types::Document;
use crate::usage::TokenUsage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationalOutput {
    pub question: String,
    pub generated_question: String,
    pub answer: String,
    pub source_documents: Vec<Document>,
    pub usage: TokenUsage,
}

/// Condense follow-ups into standalone questions, retrieve, trim the
/// documents to a token budget and answer with the QA prompt.
pub struct ConversationalRetrievalChain {
    llm: Arc<dyn LLMProvider>,
    retriever: Retriever,
    generation: GenerationConfig,
    max_tokens_limit: usize,
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Drop documents from the end until the estimated total fits `limit`.
pub fn reduce_tokens_below_limit(mut docs: Vec<Document>, limit: usize) -> Vec<Document> {
    let tokens: Vec<usize> = docs.iter().map(|d| estimate_tokens(&d.page_content)).collect();
    let mut total: usize = tokens.iter().sum();
    let mut keep = docs.len();

    while total > limit && keep > 0 {
        keep -= 1;
        total -= tokens[keep];
    }

    docs.truncate(keep);
    docs
}

impl ConversationalRetrievalChain {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        retriever: Retriever,
        generation: GenerationConfig,
        max_tokens_limit: usize,
    ) -> Self {
        Self {
            llm,
            retriever,
            generation,
            max_tokens_limit,
        }
    }

    pub fn provider_name(&self) -> String {
        self.llm.info().name
    }

    pub async fn invoke(&self, question: &str, exchanges: &ExchangeHistory) -> Result<ConversationalOutput> {
        let mut usage = TokenUsage::default();

        let generated_question = if exchanges.is_empty() {
            question.to_string()
        } else {
            let prompt = render(
                CONDENSE_QUESTION_PROMPT,
                &[("chat_history", &exchanges.to_buffer_string()), ("question", question)],
            );
            let completion = self
                .llm
                .chat(&[ChatMessage::user(prompt)], &[], &self.generation)
                .await
                .context("Question condensing failed")?;
            usage += &completion.usage;
            let condensed = completion.response.content().trim().to_string();
            if condensed.is_empty() {
                question.to_string()
            } else {
                condensed
            }
        };

        let retrieved = self
            .retriever
            .retrieve(&generated_question)
            .await
            .context("Document retrieval failed")?;
        let retrieved_count = retrieved.len();
        let source_documents = reduce_tokens_below_limit(retrieved, self.max_tokens_limit);
        if source_documents.len() < retrieved_count {
            tracing::debug!(
                kept = source_documents.len(),
                retrieved = retrieved_count,
                limit = self.max_tokens_limit,
                "Dropped documents over the token limit"
            );
        }

        let prompt = render(
            HEALTHCARE_QA_PROMPT,
            &[
                ("context", &join_documents(&source_documents)),
                ("question", &generated_question),
            ],
        );
        let completion = self
            .llm
            .chat(&[ChatMessage::user(prompt)], &[], &self.generation)
            .await
            .context("Chat completion failed")?;
        usage += &completion.usage;

        Ok(ConversationalOutput {
            question: question.to_string(),
            generated_question,
            answer: completion.response.content().to_string(),
            source_documents,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_store, ScriptedLLM};

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_drops_trailing_documents_over_limit() {
        let docs = vec![
            Document::new("a".repeat(400)), // 100 tokens
            Document::new("b".repeat(200)), // 50 tokens
            Document::new("c".repeat(40)),  // 10 tokens
        ];

        let kept = reduce_tokens_below_limit(docs.clone(), 150);
        assert_eq!(kept.len(), 2);

        let kept = reduce_tokens_below_limit(docs.clone(), 160);
        assert_eq!(kept.len(), 3);

        let kept = reduce_tokens_below_limit(docs, 50);
        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn test_first_question_skips_condensing() {
        let store = seeded_store(vec![Document::new("Chickenpox causes an itchy rash.")]).await;
        let llm = ScriptedLLM::text(&["It causes a rash. Source: cdc.gov"]);
        let chain = ConversationalRetrievalChain::new(llm.clone(), Retriever::new(store, 4), GenerationConfig::default(), 150);

        let output = chain.invoke("What does chickenpox cause?", &ExchangeHistory::new(25)).await.unwrap();

        assert_eq!(output.generated_question, "What does chickenpox cause?");
        assert_eq!(output.source_documents.len(), 1);
        assert_eq!(llm.request_count(), 1);
        let prompt = llm.last_request()[0].text().to_string();
        assert!(prompt.contains("CONTEXT: Chickenpox causes an itchy rash.\nQuestion: What does chickenpox cause?"));
    }

    #[tokio::test]
    async fn test_follow_up_is_condensed() {
        let store = seeded_store(vec![Document::new("Chickenpox is treated with rest and calamine.")]).await;
        let llm = ScriptedLLM::text(&["How is chickenpox treated?", "Rest and calamine lotion."]);
        let chain = ConversationalRetrievalChain::new(llm.clone(), Retriever::new(store, 4), GenerationConfig::default(), 150);

        let mut exchanges = ExchangeHistory::new(25);
        exchanges.push("What is chickenpox?", "A viral infection.");

        let output = chain.invoke("How is it treated?", &exchanges).await.unwrap();

        assert_eq!(output.question, "How is it treated?");
        assert_eq!(output.generated_question, "How is chickenpox treated?");
        assert_eq!(output.answer, "Rest and calamine lotion.");
        let condense = llm.requests.lock()[0][0].text().to_string();
        assert!(condense.contains("Human: What is chickenpox?\nAssistant: A viral infection."));
        assert!(condense.ends_with("Follow Up Input: How is it treated?\nStandalone question:"));
    }
}
