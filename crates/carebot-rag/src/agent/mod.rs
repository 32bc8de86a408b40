//! Tool-calling healthcare agent

pub mod tool_loop;
pub mod tools;

pub use tool_loop::{run_tool_loop, ToolInvocation, ToolLoopConfig, ToolLoopResult, ITERATION_LIMIT_MESSAGE};
pub use tools::{AgentTool, RetrieverTool, ToolInput, ToolRegistry, ToolResult, DATA_SEARCH_TOOL};

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::chain::prompts::{render, AGENT_SYSTEM_PROMPT};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::usage::TokenUsage;

/// Receives agent progress while a run is in flight.
pub trait TokenEmitter: Send + Sync {
    fn on_token(&self, token: &str);

    fn on_tool(&self, _invocation: &ToolInvocation) {}
}

/// Emitter that drops everything.
pub struct NoopEmitter;

impl TokenEmitter for NoopEmitter {
    fn on_token(&self, _token: &str) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    pub input: String,
    pub output: String,
    pub intermediate_steps: Vec<ToolInvocation>,
    pub iterations: usize,
    pub usage: TokenUsage,
}

pub struct AgentExecutor {
    llm: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    generation: GenerationConfig,
    config: ToolLoopConfig,
}

impl AgentExecutor {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        tools: Arc<ToolRegistry>,
        generation: GenerationConfig,
        config: ToolLoopConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            generation,
            config,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// `history` holds the turns before `input`.
    pub async fn invoke(
        &self,
        input: &str,
        history: &[ChatMessage],
        emitter: &dyn TokenEmitter,
    ) -> Result<AgentOutput> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(render(AGENT_SYSTEM_PROMPT, &[])));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(input));

        let result = run_tool_loop(
            self.llm.as_ref(),
            &self.tools,
            &mut messages,
            &self.generation,
            &self.config,
            emitter,
        )
        .await?;

        tracing::info!(
            iterations = result.iterations,
            tool_calls = result.tool_invocations.len(),
            stopped_early = result.stopped_early,
            "Agent run finished"
        );

        Ok(AgentOutput {
            input: input.to_string(),
            output: result.content,
            intermediate_steps: result.tool_invocations,
            iterations: result.iterations,
            usage: result.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ChatRole, ToolCall};
    use crate::storage::Retriever;
    use crate::testing::{seeded_store, ScriptedLLM};
    use crate::types::Document;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collecting {
        tokens: Mutex<String>,
        tools: Mutex<Vec<String>>,
    }

    impl TokenEmitter for Collecting {
        fn on_token(&self, token: &str) {
            self.tokens.lock().push_str(token);
        }

        fn on_tool(&self, invocation: &ToolInvocation) {
            self.tools.lock().push(invocation.tool_name.clone());
        }
    }

    async fn executor(llm: Arc<ScriptedLLM>) -> AgentExecutor {
        let store = seeded_store(vec![Document::new("Tuberculosis is treated with antibiotics.")]).await;
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RetrieverTool::new(Retriever::new(store, 3))));
        AgentExecutor::new(llm, Arc::new(tools), GenerationConfig::default(), ToolLoopConfig::default())
    }

    #[tokio::test]
    async fn test_history_precedes_input_without_duplication() {
        let llm = ScriptedLLM::text(&["Hello! How can I help?"]);
        let agent = executor(llm.clone()).await;
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];

        let output = agent.invoke("hi again", &history, &NoopEmitter).await.unwrap();

        assert_eq!(output.output, "Hello! How can I help?");
        let request = llm.last_request();
        assert_eq!(request.len(), 4);
        assert_eq!(request[0].role, ChatRole::System);
        assert_eq!(request[3].text(), "hi again");
        assert_eq!(request.iter().filter(|m| m.text() == "hi again").count(), 1);
        assert_eq!(llm.tool_offers.lock()[0], 1);
    }

    #[tokio::test]
    async fn test_emitter_sees_tokens_and_tools() {
        let llm = ScriptedLLM::new(vec![
            ChatResponse::ToolCalls(vec![ToolCall {
                id: "c1".into(),
                name: "data_search".into(),
                arguments: r#"{"query":"tuberculosis treatment"}"#.into(),
            }]),
            ChatResponse::Content("Antibiotics treat TB.".into()),
        ]);
        let agent = executor(llm).await;
        let emitter = Collecting::default();

        let output = agent.invoke("How is TB treated?", &[], &emitter).await.unwrap();

        assert_eq!(output.intermediate_steps.len(), 1);
        assert_eq!(output.iterations, 2);
        assert_eq!(*emitter.tokens.lock(), "Antibiotics treat TB.");
        assert_eq!(*emitter.tools.lock(), vec!["data_search".to_string()]);
    }

    #[tokio::test]
    async fn test_iteration_limit_message() {
        let llm = ScriptedLLM::always_tool_call("data_search", r#"{"query":"tb"}"#, 10);
        let agent = executor(llm).await;

        let output = agent.invoke("loop", &[], &NoopEmitter).await.unwrap();
        assert_eq!(output.output, "Agent stopped due to iteration limit or time limit.");
        assert_eq!(output.intermediate_steps.len(), 3);
    }
}
