//! Bounded chat transcripts and question/answer exchange history

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: String,
}

impl ChatTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn to_message(&self) -> ChatMessage {
        match self.role {
            TurnRole::User => ChatMessage::user(&self.content),
            TurnRole::Assistant => ChatMessage::assistant(&self.content),
            TurnRole::System => ChatMessage::system(&self.content),
        }
    }
}

/// Ordered transcript that keeps only the most recent `max_messages` turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
    max_messages: usize,
}

impl ChatHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);

        if self.turns.len() > self.max_messages {
            let remove_count = self.turns.len() - self.max_messages;
            self.turns.drain(0..remove_count);
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// User and assistant turns as `(role, content)`; system turns are hidden.
    pub fn displayable(&self) -> impl Iterator<Item = (TurnRole, &str)> + '_ {
        self.turns
            .iter()
            .filter(|t| t.role != TurnRole::System)
            .map(|t| (t.role, t.content.as_str()))
    }

    /// Non-system turns as model messages, oldest first.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .filter(|t| t.role != TurnRole::System)
            .map(ChatTurn::to_message)
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// `(question, answer)` pairs fed to the conversational chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeHistory {
    pairs: Vec<(String, String)>,
    max_pairs: usize,
}

impl ExchangeHistory {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            pairs: Vec::new(),
            max_pairs: max_pairs.max(1),
        }
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.pairs.push((question.into(), answer.into()));

        if self.pairs.len() > self.max_pairs {
            let remove_count = self.pairs.len() - self.max_pairs;
            self.pairs.drain(0..remove_count);
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `Human: ...\nAssistant: ...` buffer used by the condense-question prompt.
    pub fn to_buffer_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(q, a)| format!("Human: {}\nAssistant: {}", q, a))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
