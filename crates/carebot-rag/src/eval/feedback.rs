//! LLM-graded feedback functions

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};

const QA_RELEVANCE_PROMPT: &str = "You are a RELEVANCE grader; providing the relevance of the given \
RESPONSE to the given PROMPT. Respond only as a number from 0 to 10 where 0 is the least relevant \
and 10 is the most relevant.";

const CONTEXT_RELEVANCE_PROMPT: &str = "You are a RELEVANCE grader; providing the relevance of the \
given CONTEXT to the given QUESTION. Respond only as a number from 0 to 10 where 0 is the least \
relevant and 10 is the most relevant.";

const NO_ANSWER_PROMPT: &str = "Does the RESPONSE provide an answer to the QUESTION? Rate on a \
scale of 1 to 10. Respond with the number only.";

const GROUNDEDNESS_PROMPT: &str = "How factually correct is the RESPONSE to the QUESTION? Rate on \
a scale of 1 to 10. Respond with the number only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    QaRelevance,
    ContextRelevance,
    NoAnswer,
    Groundedness,
}

impl FeedbackKind {
    pub fn all() -> [FeedbackKind; 4] {
        [
            Self::QaRelevance,
            Self::ContextRelevance,
            Self::NoAnswer,
            Self::Groundedness,
        ]
    }

    /// Display name shown on the leaderboard.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QaRelevance => "Relevance between Q/A",
            Self::ContextRelevance => "Relevance between Q and Context",
            Self::NoAnswer => "Accuracy between Q/A",
            Self::Groundedness => "Groundedness",
        }
    }
}

/// Parse a grader reply such as `"8"` or `" 7.5\n"` into a score in `[0, 1]`.
pub fn parse_score(reply: &str) -> Result<f64> {
    let trimmed = reply.trim().trim_end_matches('.');
    let raw: f64 = trimmed
        .parse()
        .map_err(|_| anyhow!("Evaluator reply is not a number: {:?}", reply.trim()))?;
    if !raw.is_finite() {
        return Err(anyhow!("Evaluator reply is not a finite number: {}", trimmed));
    }
    Ok((raw / 10.0).clamp(0.0, 1.0))
}

/// Grades chain calls with an evaluator model.
#[derive(Clone)]
pub struct FeedbackProvider {
    llm: Arc<dyn LLMProvider>,
    generation: GenerationConfig,
}

impl FeedbackProvider {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            llm,
            generation: GenerationConfig::default().with_temperature(0.0),
        }
    }

    async fn grade(&self, system: &str, user: String) -> Result<f64> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let completion = self
            .llm
            .chat(&messages, &[], &self.generation)
            .await
            .context("Evaluator call failed")?;
        parse_score(completion.response.content())
    }

    pub async fn qa_relevance(&self, question: &str, answer: &str) -> Result<f64> {
        self.grade(
            QA_RELEVANCE_PROMPT,
            format!("PROMPT: {}\nRESPONSE: {}", question, answer),
        )
        .await
    }

    /// Mean relevance of each context chunk to the question. No chunks scores 0.
    pub async fn context_relevance(&self, question: &str, contexts: &[String]) -> Result<f64> {
        if contexts.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for context in contexts {
            total += self
                .grade(
                    CONTEXT_RELEVANCE_PROMPT,
                    format!("QUESTION: {}\nCONTEXT: {}", question, context),
                )
                .await?;
        }
        Ok(total / contexts.len() as f64)
    }

    pub async fn no_answer(&self, question: &str, answer: &str) -> Result<f64> {
        self.grade(NO_ANSWER_PROMPT, qa_message(question, answer)).await
    }

    pub async fn groundedness(&self, question: &str, answer: &str) -> Result<f64> {
        self.grade(GROUNDEDNESS_PROMPT, qa_message(question, answer)).await
    }

    pub async fn evaluate(
        &self,
        kind: FeedbackKind,
        question: &str,
        answer: &str,
        contexts: &[String],
    ) -> Result<f64> {
        match kind {
            FeedbackKind::QaRelevance => self.qa_relevance(question, answer).await,
            FeedbackKind::ContextRelevance => self.context_relevance(question, contexts).await,
            FeedbackKind::NoAnswer => self.no_answer(question, answer).await,
            FeedbackKind::Groundedness => self.groundedness(question, answer).await,
        }
    }
}

fn qa_message(question: &str, answer: &str) -> String {
    format!("QUESTION: {}; RESPONSE: {}", question, answer)
}
