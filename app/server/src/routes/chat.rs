use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use carebot_rag::eval::conversational_app_id;
use carebot_rag::{ApiProvider, Document, TokenEmitter, TokenUsage, ToolInvocation, UsageTracker};

use crate::error::{ApiError, ApiResult};
use crate::session::Page;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<Uuid>,
    pub input: String,
    /// Conversational page only: "OpenAI", "Google" or anything else for Anthropic.
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: Option<String>,
    pub content: String,
}

impl From<&Document> for SourceRef {
    fn from(doc: &Document) -> Self {
        Self {
            source: doc.source().map(str::to_string),
            content: doc.page_content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReply {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
    /// Cost rounded to cents.
    pub display_cost: f64,
    pub calls: u64,
}

impl From<&UsageTracker> for UsageReply {
    fn from(tracker: &UsageTracker) -> Self {
        let totals = tracker.totals();
        Self {
            total_tokens: totals.total_tokens,
            prompt_tokens: totals.prompt_tokens,
            completion_tokens: totals.completion_tokens,
            total_cost: totals.total_cost,
            display_cost: tracker.display_cost(),
            calls: tracker.calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub session_id: Uuid,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
}

fn require_input(input: &str) -> ApiResult<&str> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ApiError::BadRequest("Input must not be empty".to_string()));
    }
    Ok(input)
}

pub async fn retriever_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let input = require_input(&request.input)?;
    let chain = state.chains.retrieval_chain().map_err(ApiError::unavailable)?;
    let session_id = state.sessions.resolve(request.session_id);

    let output = chain.invoke(input).await?;

    let usage = state.sessions.with_page(session_id, Page::Retriever, |page| {
        page.push_exchange(input, &output.answer);
        page.usage.update(&output.usage);
        UsageReply::from(&page.usage)
    });

    Ok(Json(ChatReply {
        session_id,
        answer: output.answer,
        search_query: None,
        sources: output.context.iter().map(SourceRef::from).collect(),
        usage: Some(usage),
        provider: None,
        record_id: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub session_id: Option<Uuid>,
}

/// Cumulative retriever usage of a session; zero for unknown sessions.
pub async fn retriever_usage(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsageQuery>,
) -> Json<UsageReply> {
    let usage = match query.session_id {
        Some(id) if state.sessions.contains(id) => {
            state.sessions.with_page(id, Page::Retriever, |page| UsageReply::from(&page.usage))
        }
        _ => UsageReply::from(&UsageTracker::new()),
    };
    Json(usage)
}

pub async fn history_aware_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let input = require_input(&request.input)?;
    let chain = state.chains.history_aware_chain().map_err(ApiError::unavailable)?;
    let session_id = state.sessions.resolve(request.session_id);
    let history = state.sessions.history_messages(session_id, Page::HistoryAware);

    let output = chain.invoke(input, &history).await?;

    let usage = state.sessions.with_page(session_id, Page::HistoryAware, |page| {
        page.push_exchange(input, &output.answer);
        page.usage.update(&output.usage);
        UsageReply::from(&page.usage)
    });

    Ok(Json(ChatReply {
        session_id,
        answer: output.answer,
        search_query: Some(output.search_query),
        sources: output.context.iter().map(SourceRef::from).collect(),
        usage: Some(usage),
        provider: None,
        record_id: None,
    }))
}

pub async fn conversational_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let input = require_input(&request.input)?;
    let provider = ApiProvider::from_choice(request.provider.as_deref().unwrap_or("Google"));
    let chain = state
        .chains
        .conversational_chain(provider)
        .map_err(ApiError::unavailable)?;
    let session_id = state.sessions.resolve(request.session_id);
    let exchanges = state
        .sessions
        .with_page(session_id, Page::Conversational, |page| page.exchanges.clone());

    let app_id = conversational_app_id(provider);
    let recorded = state
        .recorder
        .record(&app_id, input, chain.invoke(input, &exchanges))
        .await?;
    let output = recorded.output;

    state.sessions.with_page(session_id, Page::Conversational, |page| {
        page.exchanges.push(input, output.answer.as_str());
        page.push_exchange(input, &output.answer);
        page.usage.update(&output.usage);
    });

    Ok(Json(ChatReply {
        session_id,
        answer: output.answer,
        search_query: Some(output.generated_question),
        sources: output.source_documents.iter().map(SourceRef::from).collect(),
        usage: None,
        provider: Some(provider.to_string()),
        record_id: Some(recorded.record_id),
    }))
}

#[derive(Debug, Serialize)]
pub struct ProvidersReply {
    pub available: Vec<String>,
    pub evaluator: bool,
}

pub async fn providers(State(state): State<Arc<AppState>>) -> Json<ProvidersReply> {
    let providers = state.chains.providers();
    Json(ProvidersReply {
        available: providers.available().iter().map(|p| p.to_string()).collect(),
        evaluator: providers.evaluator().is_some(),
    })
}

/// Events of the agent stream, one SSE event each.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AgentEvent {
    Token {
        token: String,
    },
    Tool {
        tool: String,
        arguments: serde_json::Value,
        success: bool,
        duration_ms: u64,
    },
    Answer {
        session_id: Uuid,
        output: String,
        iterations: usize,
        usage: TokenUsage,
    },
    Error {
        error: String,
    },
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::Token { .. } => "token",
            AgentEvent::Tool { .. } => "tool",
            AgentEvent::Answer { .. } => "answer",
            AgentEvent::Error { .. } => "error",
        }
    }

    fn into_sse(self) -> Event {
        let name = self.name();
        match Event::default().event(name).json_data(&self) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!("Failed to serialize SSE payload for {}: {}", name, err);
                Event::default().event("error").data("serialization failed")
            }
        }
    }
}

struct ChannelEmitter {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl TokenEmitter for ChannelEmitter {
    fn on_token(&self, token: &str) {
        let _ = self.tx.send(AgentEvent::Token {
            token: token.to_string(),
        });
    }

    fn on_tool(&self, invocation: &ToolInvocation) {
        let _ = self.tx.send(AgentEvent::Tool {
            tool: invocation.tool_name.clone(),
            arguments: invocation.arguments.clone(),
            success: invocation.success,
            duration_ms: invocation.duration_ms,
        });
    }
}

pub async fn agent_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let input = require_input(&request.input)?.to_string();
    let agent = state.chains.agent_executor().map_err(ApiError::unavailable)?;
    let session_id = state.sessions.resolve(request.session_id);
    let history = state.sessions.history_messages(session_id, Page::Agent);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let emitter = ChannelEmitter { tx: tx.clone() };
        let event = match agent.invoke(&input, &history, &emitter).await {
            Ok(output) => {
                state
                    .sessions
                    .with_page(session_id, Page::Agent, |page| page.push_exchange(&input, &output.output));
                AgentEvent::Answer {
                    session_id,
                    output: output.output,
                    iterations: output.iterations,
                    usage: output.usage,
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "Agent run failed: {:#}", e);
                AgentEvent::Error {
                    error: format!("{:#}", e),
                }
            }
        };
        let _ = tx.send(event);
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.into_sse()));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
