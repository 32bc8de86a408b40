//! Scripted collaborators for unit tests.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::embeddings::HashingEmbedder;
use crate::llm::{
    ChatCompletion, ChatMessage, ChatResponse, GenerationConfig, LLMProvider, ProviderInfo,
    ToolCall, ToolSchema,
};
use crate::storage::{InMemoryVectorStore, VectorStore};
use crate::types::Document;
use crate::usage::TokenUsage;

/// Replies with queued responses in order, then with `fallback`.
/// Every request is recorded for inspection.
pub struct ScriptedLLM {
    replies: Mutex<VecDeque<ChatResponse>>,
    fallback: String,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub tool_offers: Mutex<Vec<usize>>,
}

impl ScriptedLLM {
    pub fn new(replies: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: "ok".to_string(),
            requests: Mutex::new(Vec::new()),
            tool_offers: Mutex::new(Vec::new()),
        })
    }

    pub fn text(replies: &[&str]) -> Arc<Self> {
        Self::new(
            replies
                .iter()
                .map(|r| ChatResponse::Content(r.to_string()))
                .collect(),
        )
    }

    pub fn always_tool_call(name: &str, arguments: &str, times: usize) -> Arc<Self> {
        Self::new(
            (0..times)
                .map(|i| {
                    ChatResponse::ToolCalls(vec![ToolCall {
                        id: format!("call_{}", i),
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    }])
                })
                .collect(),
        )
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLLM {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        _config: &GenerationConfig,
    ) -> Result<ChatCompletion> {
        self.requests.lock().push(messages.to_vec());
        self.tool_offers.lock().push(tools.len());
        let response = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| ChatResponse::Content(self.fallback.clone()));
        Ok(ChatCompletion {
            response,
            usage: TokenUsage::new(10, 5),
        })
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".to_string(),
            model: "scripted".to_string(),
            supports_streaming: false,
            supports_functions: true,
        }
    }
}

pub async fn seeded_store(docs: Vec<Document>) -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new(Arc::new(HashingEmbedder::default())));
    store.add_documents(docs).await.expect("seed store");
    store
}
