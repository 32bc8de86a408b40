//! Agent tools and the registry the tool loop dispatches through

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::llm::ToolSchema;
use crate::storage::{join_documents, Retriever};

/// Input for a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_id: String,
    pub parameters: serde_json::Value,
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Observation handed back to the model.
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            output: message.clone(),
            error: Some(message),
        }
    }
}

/// Trait for tools that agents can use
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Name the model calls the tool by
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameter schema (JSON Schema format)
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, input: ToolInput) -> Result<ToolResult>;
}

/// Registry of available tools, ordered by id so schemas are stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(tool_id).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schemas offered to the model on each round-trip.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|tool| ToolSchema {
                name: tool.id().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

pub const DATA_SEARCH_TOOL: &str = "data_search";

const DATA_SEARCH_DESCRIPTION: &str = "Search for information about diseases in the vector \
database and return the most relevant information.";

/// Looks up the healthcare vector store and returns the joined page contents.
pub struct RetrieverTool {
    retriever: Retriever,
}

impl RetrieverTool {
    pub fn new(retriever: Retriever) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl AgentTool for RetrieverTool {
    fn id(&self) -> &str {
        DATA_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        DATA_SEARCH_DESCRIPTION
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "query to look up in retriever"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolResult> {
        let query = input
            .parameters
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow!("Missing required parameter: query"))?;

        tracing::debug!(query = %query, k = self.retriever.k(), "data_search");
        let docs = self.retriever.retrieve(query).await?;
        Ok(ToolResult::ok(join_documents(&docs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_store;
    use crate::types::Document;

    fn input(parameters: serde_json::Value) -> ToolInput {
        ToolInput {
            tool_id: DATA_SEARCH_TOOL.to_string(),
            parameters,
        }
    }

    #[tokio::test]
    async fn test_data_search_joins_top_documents() {
        let store = seeded_store(vec![
            Document::new("Malaria is spread by mosquitoes."),
            Document::new("Malaria symptoms include fever."),
            Document::new("Sprains heal with rest, ice, compression and elevation over several days."),
        ])
        .await;
        let tool = RetrieverTool::new(Retriever::new(store, 2));

        let result = tool.execute(input(serde_json::json!({"query": "malaria"}))).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output.matches("Malaria").count(), 2);
        assert!(result.output.contains("\n\n"));
        assert!(!result.output.contains("Sprains"));
    }

    #[tokio::test]
    async fn test_data_search_requires_query() {
        let store = seeded_store(Vec::new()).await;
        let tool = RetrieverTool::new(Retriever::new(store, 3));
        assert!(tool.execute(input(serde_json::json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_exposes_schema() {
        let store = seeded_store(Vec::new()).await;
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RetrieverTool::new(Retriever::new(store, 3))));

        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "data_search");
        assert!(schemas[0].description.starts_with("Search for information about diseases"));
        assert_eq!(schemas[0].parameters["required"][0], "query");
        assert!(registry.get("nope").is_none());
    }
}
