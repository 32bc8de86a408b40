//! LLM Module - hosted chat completion providers (OpenAI, Google, Anthropic)

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ChatbotConfig;
use crate::usage::TokenUsage;

pub mod external;
pub mod sse;

pub use external::ExternalProvider;

/// External API providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    Google,
    Anthropic,
}

impl ApiProvider {
    /// Map a UI selection to a provider. Anything that is not OpenAI or
    /// Google selects Anthropic.
    pub fn from_choice(choice: &str) -> Self {
        match choice.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAI,
            "google" => Self::Google,
            _ => Self::Anthropic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Google => "Google",
            Self::Anthropic => "Anthropic",
        }
    }

    pub fn all() -> [ApiProvider; 3] {
        [Self::OpenAI, Self::Google, Self::Anthropic]
    }
}

impl fmt::Display for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Chat completion with full message history and optional tool schemas.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatCompletion>;

    /// Streaming chat completion with tool support.
    /// Default implementation runs `chat` and replays the result as events.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>> {
        let completion = self.chat(messages, tools, config).await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            match completion.response {
                ChatResponse::Content(text) => {
                    let _ = tx.send(ChatStreamEvent::ContentDelta(text)).await;
                }
                ChatResponse::ToolCalls(calls) => {
                    for call in calls {
                        let _ = tx.send(ChatStreamEvent::ToolCallComplete(call)).await;
                    }
                }
            }
            let _ = tx.send(ChatStreamEvent::Usage(completion.usage)).await;
            let _ = tx.send(ChatStreamEvent::Done).await;
        });
        Ok(rx)
    }

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.5,
            top_p: 1.0,
            top_k: 40,
        }
    }
}

impl From<&ChatbotConfig> for GenerationConfig {
    fn from(config: &ChatbotConfig) -> Self {
        Self {
            max_tokens: config.models.max_tokens,
            temperature: config.models.temperature,
            ..Default::default()
        }
    }
}

impl GenerationConfig {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

// ==================== Message Types ====================

/// A chat message with role, content, and optional tool call metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call a tool message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, Some(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, Some(content.into()))
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(ChatRole::Assistant, None)
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(ChatRole::Tool, Some(content.into()))
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call emitted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON arguments string
    pub arguments: String,
}

/// Schema describing a tool the LLM can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: JsonValue,
}

/// Either text content or tool call requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChatResponse {
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

impl ChatResponse {
    /// Text of a content response; empty for tool calls.
    pub fn content(&self) -> &str {
        match self {
            Self::Content(text) => text,
            Self::ToolCalls(_) => "",
        }
    }
}

/// A response together with the tokens it cost.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub response: ChatResponse,
    pub usage: TokenUsage,
}

impl ChatCompletion {
    pub fn content(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            response: ChatResponse::Content(text.into()),
            usage,
        }
    }
}

/// A streaming event from the chat completion.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    /// A token of text content
    ContentDelta(String),
    /// A tool call was fully received (streamed tool calls are assembled first)
    ToolCallComplete(ToolCall),
    /// Token accounting, sent once near the end of the stream
    Usage(TokenUsage),
    Done,
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_streaming: bool,
    pub supports_functions: bool,
}

/// The providers this process has credentials for, plus the evaluator model.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<ApiProvider, Arc<dyn LLMProvider>>,
    evaluator: Option<Arc<dyn LLMProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an `ExternalProvider` for every provider whose API key is set.
    pub fn from_config(config: &ChatbotConfig) -> Result<Self> {
        let mut set = Self::new();
        let secrets = &config.secrets;
        let models = &config.models;

        let keyed = [
            (ApiProvider::OpenAI, &secrets.openai_api_key, &models.openai),
            (ApiProvider::Google, &secrets.google_api_key, &models.google),
            (ApiProvider::Anthropic, &secrets.anthropic_api_key, &models.anthropic),
        ];

        for (provider, key, model) in keyed {
            match key {
                Some(key) => {
                    let client = ExternalProvider::new(provider, key.clone(), model.clone())?;
                    set.providers.insert(provider, Arc::new(client));
                }
                None => tracing::warn!("No API key configured for {}", provider),
            }
        }

        if let Some(key) = &secrets.openai_api_key {
            let evaluator =
                ExternalProvider::new(ApiProvider::OpenAI, key.clone(), models.evaluator.clone())?;
            set.evaluator = Some(Arc::new(evaluator));
        }

        Ok(set)
    }

    pub fn with_provider(mut self, provider: ApiProvider, llm: Arc<dyn LLMProvider>) -> Self {
        self.providers.insert(provider, llm);
        self
    }

    pub fn with_evaluator(mut self, llm: Arc<dyn LLMProvider>) -> Self {
        self.evaluator = Some(llm);
        self
    }

    pub fn get(&self, provider: ApiProvider) -> Result<Arc<dyn LLMProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| anyhow!("No API key configured for {}", provider))
    }

    pub fn evaluator(&self) -> Option<Arc<dyn LLMProvider>> {
        self.evaluator.clone()
    }

    pub fn available(&self) -> Vec<ApiProvider> {
        ApiProvider::all()
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}
