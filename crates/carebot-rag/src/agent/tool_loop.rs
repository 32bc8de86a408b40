//! ReAct tool-calling loop
//!
//! Streams the model's reply, executes any requested tool calls, feeds the
//! observations back and loops until the model answers in text or the
//! iteration budget runs out.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::{Duration, Instant};

use super::tools::{ToolInput, ToolRegistry, ToolResult};
use super::TokenEmitter;
use crate::llm::{ChatMessage, ChatStreamEvent, GenerationConfig, LLMProvider, ToolCall};
use crate::usage::TokenUsage;

pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Maximum number of model round-trips.
    pub max_iterations: usize,
    pub tool_timeout: Duration,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// One executed tool call and its observation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ToolLoopResult {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub iterations: usize,
    pub usage: TokenUsage,
    /// True when the loop gave up instead of receiving a text answer.
    pub stopped_early: bool,
}

/// Run the loop over `messages`, appending assistant tool calls and tool
/// results to it as they happen.
pub async fn run_tool_loop(
    llm: &dyn LLMProvider,
    registry: &ToolRegistry,
    messages: &mut Vec<ChatMessage>,
    generation: &GenerationConfig,
    config: &ToolLoopConfig,
    emitter: &dyn TokenEmitter,
) -> Result<ToolLoopResult> {
    let schemas = registry.schemas();
    let mut invocations = Vec::new();
    let mut usage = TokenUsage::default();
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        tracing::debug!(iteration = iterations, "Tool loop: sending to LLM");

        let mut rx = llm.chat_stream(messages.as_slice(), &schemas, generation).await?;
        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        while let Some(event) = rx.recv().await {
            match event {
                ChatStreamEvent::ContentDelta(delta) => {
                    emitter.on_token(&delta);
                    content.push_str(&delta);
                }
                ChatStreamEvent::ToolCallComplete(call) => tool_calls.push(call),
                ChatStreamEvent::Usage(u) => usage += &u,
                ChatStreamEvent::Done => break,
            }
        }

        if tool_calls.is_empty() {
            return Ok(ToolLoopResult {
                content,
                tool_invocations: invocations,
                iterations,
                usage,
                stopped_early: false,
            });
        }

        tracing::info!(
            iteration = iterations,
            tools = ?tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>(),
            "Tool loop: LLM requested tool calls"
        );
        messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

        for call in &tool_calls {
            let start = Instant::now();
            let (output, success) = match execute_tool_call(registry, call, config.tool_timeout).await {
                Ok(result) => (result.output, result.success),
                Err(e) => (format!("Tool execution error: {}", e), false),
            };

            let invocation = ToolInvocation {
                tool_name: call.name.clone(),
                arguments: serde_json::from_str(&call.arguments).unwrap_or(serde_json::json!({})),
                result: output.clone(),
                success,
                duration_ms: start.elapsed().as_millis() as u64,
            };
            emitter.on_tool(&invocation);
            invocations.push(invocation);

            messages.push(ChatMessage::tool_result(&call.id, &call.name, &output));
        }
    }

    tracing::warn!(max = config.max_iterations, "Tool loop hit max iterations");
    Ok(ToolLoopResult {
        content: ITERATION_LIMIT_MESSAGE.to_string(),
        tool_invocations: invocations,
        iterations,
        usage,
        stopped_early: true,
    })
}

async fn execute_tool_call(registry: &ToolRegistry, call: &ToolCall, timeout: Duration) -> Result<ToolResult> {
    let tool = registry
        .get(&call.name)
        .ok_or_else(|| anyhow!("Unknown tool: {}", call.name))?;

    let parameters: serde_json::Value = if call.arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&call.arguments)
            .map_err(|e| anyhow!("Invalid arguments for {}: {}", call.name, e))?
    };

    let input = ToolInput {
        tool_id: call.name.clone(),
        parameters,
    };

    match tokio::time::timeout(timeout, tool.execute(input)).await {
        Ok(result) => result,
        Err(_) => Ok(ToolResult::failed(format!(
            "Tool '{}' timed out after {}s",
            call.name,
            timeout.as_secs()
        ))),
    }
}
