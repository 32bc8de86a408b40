//! Hosted chat completion clients speaking each provider's wire format.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::sse::{self, AnthropicStreamParser, OpenAIStreamParser};
use super::{
    ApiProvider, ChatCompletion, ChatMessage, ChatResponse, ChatRole, ChatStreamEvent,
    GenerationConfig, LLMProvider, ProviderInfo, ToolCall, ToolSchema,
};
use crate::http::{build_client, parse_json_response, request_error};
use crate::usage::TokenUsage;

pub struct ExternalProvider {
    provider: ApiProvider,
    api_key: String,
    model: String,
    client: Client,
    base_url: Option<String>,
}

impl ExternalProvider {
    pub fn new(provider: ApiProvider, api_key: String, model: String) -> Result<Self> {
        let client = build_client()?;

        tracing::info!(provider = %provider, model = %model, "Initialized external LLM provider");

        Ok(Self {
            provider,
            api_key,
            model,
            client,
            base_url: None,
        })
    }

    /// Override the API host, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn get_endpoint(&self) -> String {
        let base = |default: &str| self.base_url.clone().unwrap_or_else(|| default.to_string());
        match self.provider {
            ApiProvider::OpenAI => format!("{}/v1/chat/completions", base("https://api.openai.com")),
            ApiProvider::Anthropic => format!("{}/v1/messages", base("https://api.anthropic.com")),
            ApiProvider::Google => format!(
                "{}/v1beta/models/{}:generateContent",
                base("https://generativelanguage.googleapis.com"),
                self.model
            ),
        }
    }

    async fn post(&self, request: &Value) -> Result<reqwest::Response> {
        let endpoint = self.get_endpoint();
        let builder = self.client.post(&endpoint).json(request);
        let builder = match self.provider {
            ApiProvider::OpenAI => builder.bearer_auth(&self.api_key),
            ApiProvider::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
            ApiProvider::Google => builder.header("x-goog-api-key", &self.api_key),
        };
        builder.send().await.map_err(|e| request_error(&endpoint, e))
    }

    /// Reject error statuses and HTML bodies before handing a response to the SSE pump.
    async fn check_stream_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !status.is_success() || content_type.contains("text/html") {
            let error = response.text().await.unwrap_or_default();
            let preview: String = error.chars().take(300).collect();
            return Err(anyhow!(
                "{} streaming error (HTTP {}, content-type: {}): {}",
                self.provider,
                status,
                content_type,
                preview
            ));
        }
        Ok(response)
    }

    // ==================== OpenAI ====================

    pub(crate) fn openai_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
        stream: bool,
    ) -> Value {
        let mut request = json!({
            "model": self.model,
            "messages": format_openai_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": stream,
        });
        if stream {
            request["stream_options"] = json!({ "include_usage": true });
        }
        if !tools.is_empty() {
            request["tools"] = json!(format_openai_tools(tools));
            request["tool_choice"] = json!("auto");
        }
        request
    }

    async fn openai_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatCompletion> {
        let request = self.openai_request(messages, tools, config, false);
        let response = self.post(&request).await?;
        let body: Value = parse_json_response(response, &self.get_endpoint()).await?;
        Ok(parse_openai_response(&body, &self.model))
    }

    // ==================== Anthropic ====================

    pub(crate) fn anthropic_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
        stream: bool,
    ) -> Value {
        let (system_prompt, api_messages) = format_anthropic_messages(messages);
        let mut request = json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
        });
        if stream {
            request["stream"] = json!(true);
        }
        if let Some(sys) = system_prompt {
            request["system"] = json!(sys);
        }
        if !tools.is_empty() {
            request["tools"] = json!(format_anthropic_tools(tools));
        }
        request
    }

    async fn anthropic_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatCompletion> {
        let request = self.anthropic_request(messages, tools, config, false);
        let response = self.post(&request).await?;
        let body: Value = parse_json_response(response, &self.get_endpoint()).await?;
        Ok(parse_anthropic_response(&body, &self.model))
    }

    // ==================== Google Gemini ====================

    pub(crate) fn google_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Value {
        let mut request = json!({
            "contents": format_google_contents(messages),
            "generationConfig": {
                "temperature": config.temperature,
                "topP": config.top_p,
                "topK": config.top_k,
                "maxOutputTokens": config.max_tokens,
            }
        });

        if !tools.is_empty() {
            let functions: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            request["tools"] = json!([{ "functionDeclarations": functions }]);
        }
        request
    }

    async fn google_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatCompletion> {
        let request = self.google_request(messages, tools, config);
        let response = self.post(&request).await?;
        let body: Value = parse_json_response(response, &self.get_endpoint()).await?;
        parse_google_response(&body)
    }
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatCompletion> {
        let completion = match self.provider {
            ApiProvider::OpenAI => self.openai_chat(messages, tools, config).await?,
            ApiProvider::Anthropic => self.anthropic_chat(messages, tools, config).await?,
            ApiProvider::Google => self.google_chat(messages, tools, config).await?,
        };
        tracing::debug!(
            provider = %self.provider,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            "Chat completion finished"
        );
        Ok(completion)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<mpsc::Receiver<ChatStreamEvent>> {
        match self.provider {
            ApiProvider::OpenAI => {
                let request = self.openai_request(messages, tools, config, true);
                let response = self.check_stream_response(self.post(&request).await?).await?;
                Ok(sse::pump(response, OpenAIStreamParser::new(&self.model)))
            }
            ApiProvider::Anthropic => {
                let request = self.anthropic_request(messages, tools, config, true);
                let response = self.check_stream_response(self.post(&request).await?).await?;
                Ok(sse::pump(response, AnthropicStreamParser::new(&self.model)))
            }
            ApiProvider::Google => {
                // generateContent is not streamed; replay the whole completion.
                let completion = self.google_chat(messages, tools, config).await?;
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
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.provider.to_string(),
            model: self.model.clone(),
            supports_streaming: !matches!(self.provider, ApiProvider::Google),
            supports_functions: true,
        }
    }
}

// ==================== Wire formats ====================

fn format_openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({ "role": role });
            msg["content"] = match &m.content {
                Some(content) => json!(content),
                None => Value::Null,
            };
            if let Some(calls) = &m.tool_calls {
                msg["tool_calls"] = json!(calls
                    .iter()
                    .map(|tc| json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.arguments }
                    }))
                    .collect::<Vec<_>>());
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

fn format_openai_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

pub(crate) fn openai_usage(usage: &Value, model: &str) -> TokenUsage {
    let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
    let mut parsed = TokenUsage::new(prompt, completion).priced(model);
    if let Some(total) = usage["total_tokens"].as_u64() {
        parsed.total_tokens = total;
    }
    parsed
}

fn parse_openai_response(body: &Value, model: &str) -> ChatCompletion {
    let usage = openai_usage(&body["usage"], model);
    let choice = &body["choices"][0]["message"];

    if let Some(tool_calls) = choice["tool_calls"].as_array() {
        let calls: Vec<ToolCall> = tool_calls
            .iter()
            .filter_map(|tc| {
                Some(ToolCall {
                    id: tc["id"].as_str()?.to_string(),
                    name: tc["function"]["name"].as_str()?.to_string(),
                    arguments: tc["function"]["arguments"].as_str()?.to_string(),
                })
            })
            .collect();
        if !calls.is_empty() {
            return ChatCompletion {
                response: ChatResponse::ToolCalls(calls),
                usage,
            };
        }
    }

    ChatCompletion::content(choice["content"].as_str().unwrap_or_default(), usage)
}

fn format_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut api_messages = Vec::new();

    for m in messages {
        match m.role {
            ChatRole::System => {
                if let Some(content) = &m.content {
                    system_parts.push(content);
                }
            }
            ChatRole::User => {
                if let Some(content) = &m.content {
                    api_messages.push(json!({ "role": "user", "content": content }));
                }
            }
            ChatRole::Assistant => {
                if let Some(calls) = &m.tool_calls {
                    let content: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            let args: Value = serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                            json!({ "type": "tool_use", "id": tc.id, "name": tc.name, "input": args })
                        })
                        .collect();
                    api_messages.push(json!({ "role": "assistant", "content": content }));
                } else if let Some(content) = &m.content {
                    api_messages.push(json!({ "role": "assistant", "content": content }));
                }
            }
            ChatRole::Tool => {
                if let (Some(id), Some(content)) = (&m.tool_call_id, &m.content) {
                    let block = json!({ "type": "tool_result", "tool_use_id": id, "content": content });
                    // All results for one assistant turn share a single user turn.
                    match api_messages.last_mut() {
                        Some(last) if is_tool_result_turn(last) => {
                            if let Some(blocks) = last["content"].as_array_mut() {
                                blocks.push(block);
                            }
                        }
                        _ => api_messages.push(json!({ "role": "user", "content": [block] })),
                    }
                }
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, api_messages)
}

fn is_tool_result_turn(message: &Value) -> bool {
    message["role"] == "user"
        && message["content"]
            .as_array()
            .and_then(|blocks| blocks.first())
            .is_some_and(|block| block["type"] == "tool_result")
}

fn format_anthropic_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters,
            })
        })
        .collect()
}

fn parse_anthropic_response(body: &Value, model: &str) -> ChatCompletion {
    let usage = TokenUsage::new(
        body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        body["usage"]["output_tokens"].as_u64().unwrap_or(0),
    )
    .priced(model);

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(content) = body["content"].as_array() {
        for block in content {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        text_parts.push(text.to_string());
                    }
                }
                Some("tool_use") => {
                    if let (Some(id), Some(name)) = (block["id"].as_str(), block["name"].as_str()) {
                        tool_calls.push(ToolCall {
                            id: id.to_string(),
                            name: name.to_string(),
                            arguments: block["input"].to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    let response = if tool_calls.is_empty() {
        ChatResponse::Content(text_parts.join(""))
    } else {
        ChatResponse::ToolCalls(tool_calls)
    };
    ChatCompletion { response, usage }
}

/// Gemini has no system role here: system text is prefixed onto the first
/// user turn instead.
fn format_google_contents(messages: &[ChatMessage]) -> Vec<Value> {
    let mut contents = Vec::new();
    let mut pending_system: Vec<&str> = Vec::new();

    for m in messages {
        match m.role {
            ChatRole::System => {
                if let Some(content) = &m.content {
                    pending_system.push(content);
                }
            }
            ChatRole::User => {
                if let Some(content) = &m.content {
                    let text = if pending_system.is_empty() {
                        content.clone()
                    } else {
                        let mut merged = pending_system.join("\n\n");
                        merged.push_str("\n\n");
                        merged.push_str(content);
                        pending_system.clear();
                        merged
                    };
                    contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));
                }
            }
            ChatRole::Assistant => {
                if let Some(calls) = &m.tool_calls {
                    let parts: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            let args: Value = serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                            json!({ "functionCall": { "name": tc.name, "args": args } })
                        })
                        .collect();
                    contents.push(json!({ "role": "model", "parts": parts }));
                } else if let Some(content) = &m.content {
                    contents.push(json!({ "role": "model", "parts": [{ "text": content }] }));
                }
            }
            ChatRole::Tool => {
                if let (Some(name), Some(content)) = (&m.name, &m.content) {
                    let result: Value =
                        serde_json::from_str(content).unwrap_or(json!({ "result": content }));
                    let result = if result.is_object() { result } else { json!({ "result": result }) };
                    contents.push(json!({
                        "role": "user",
                        "parts": [{ "functionResponse": { "name": name, "response": result } }]
                    }));
                }
            }
        }
    }

    // A system prompt with no following user turn still has to be sent.
    if !pending_system.is_empty() {
        contents.push(json!({ "role": "user", "parts": [{ "text": pending_system.join("\n\n") }] }));
    }

    contents
}

fn parse_google_response(body: &Value) -> Result<ChatCompletion> {
    let meta = &body["usageMetadata"];
    let mut usage = TokenUsage::new(
        meta["promptTokenCount"].as_u64().unwrap_or(0),
        meta["candidatesTokenCount"].as_u64().unwrap_or(0),
    );
    if let Some(total) = meta["totalTokenCount"].as_u64() {
        usage.total_tokens = total;
    }

    let Some(candidate) = body["candidates"].get(0) else {
        let reason = body["promptFeedback"]["blockReason"].as_str().unwrap_or("no candidates returned");
        return Err(anyhow!("Google returned no completion: {}", reason));
    };

    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                text_parts.push(text.to_string());
            }
            if let Some(fc) = part.get("functionCall") {
                if let Some(name) = fc["name"].as_str() {
                    let short_id = uuid::Uuid::new_v4().simple().to_string();
                    tool_calls.push(ToolCall {
                        id: format!("call_{}", &short_id[..8]),
                        name: name.to_string(),
                        arguments: fc["args"].to_string(),
                    });
                }
            }
        }
    }

    let response = if tool_calls.is_empty() {
        ChatResponse::Content(text_parts.join(""))
    } else {
        ChatResponse::ToolCalls(tool_calls)
    };
    Ok(ChatCompletion { response, usage })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(kind: ApiProvider, model: &str) -> ExternalProvider {
        ExternalProvider::new(kind, "test-key".into(), model.into()).unwrap()
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            provider(ApiProvider::OpenAI, "gpt-4").get_endpoint(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider(ApiProvider::Google, "gemini-pro").get_endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
        assert_eq!(
            provider(ApiProvider::Anthropic, "claude")
                .with_base_url("http://localhost:9000/")
                .get_endpoint(),
            "http://localhost:9000/v1/messages"
        );
    }

    #[test]
    fn test_openai_stream_request_asks_for_usage() {
        let p = provider(ApiProvider::OpenAI, "gpt-4-turbo-preview");
        let req = p.openai_request(&[ChatMessage::user("hi")], &[], &GenerationConfig::default(), true);
        assert_eq!(req["stream"], true);
        assert_eq!(req["stream_options"]["include_usage"], true);
        assert!(req.get("tools").is_none());
    }

    #[test]
    fn test_anthropic_request_lifts_system_prompt() {
        let p = provider(ApiProvider::Anthropic, "claude-3-opus-20240229");
        let messages = vec![ChatMessage::system("Be brief."), ChatMessage::user("What is flu?")];
        let req = p.anthropic_request(&messages, &[], &GenerationConfig::default(), false);
        assert_eq!(req["system"], "Be brief.");
        assert_eq!(req["messages"].as_array().unwrap().len(), 1);
        assert_eq!(req["messages"][0]["role"], "user");
    }

    #[test]
    fn test_anthropic_groups_parallel_tool_results() {
        let calls = vec![
            ToolCall {
                id: "toolu_1".into(),
                name: "data_search".into(),
                arguments: r#"{"query":"flu"}"#.into(),
            },
            ToolCall {
                id: "toolu_2".into(),
                name: "data_search".into(),
                arguments: r#"{"query":"fever"}"#.into(),
            },
        ];
        let messages = vec![
            ChatMessage::user("Flu or fever?"),
            ChatMessage::assistant_tool_calls(calls),
            ChatMessage::tool_result("toolu_1", "data_search", "Flu is viral."),
            ChatMessage::tool_result("toolu_2", "data_search", "Fever is a symptom."),
            ChatMessage::user("Thanks"),
        ];

        let (_, api_messages) = format_anthropic_messages(&messages);
        assert_eq!(api_messages.len(), 4);
        assert_eq!(api_messages[1]["content"].as_array().unwrap().len(), 2);

        let results = api_messages[2]["content"].as_array().unwrap();
        assert_eq!(api_messages[2]["role"], "user");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["tool_use_id"], "toolu_2");
        assert_eq!(api_messages[3]["content"], "Thanks");
    }

    #[test]
    fn test_google_converts_system_to_human() {
        let messages = vec![
            ChatMessage::system("You are a medical assistant."),
            ChatMessage::user("What is flu?"),
            ChatMessage::assistant("An infection."),
        ];
        let contents = format_google_contents(&messages);
        assert_eq!(contents.len(), 2);
        assert_eq!(
            contents[0]["parts"][0]["text"],
            "You are a medical assistant.\n\nWhat is flu?"
        );
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn test_parse_openai_tool_calls_and_usage() {
        let body = json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_9", "type": "function", "function": {"name": "data_search", "arguments": "{\"query\":\"flu\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 1000, "completion_tokens": 1000, "total_tokens": 2000}
        });
        let completion = parse_openai_response(&body, "gpt-4-turbo-preview");
        assert!(matches!(completion.response, ChatResponse::ToolCalls(ref c) if c[0].name == "data_search"));
        assert_eq!(completion.usage.total_tokens, 2000);
        assert!((completion.usage.total_cost - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_parse_anthropic_usage_sums_tokens() {
        let body = json!({
            "content": [{"type": "text", "text": "Rest and "}, {"type": "text", "text": "fluids."}],
            "usage": {"input_tokens": 12, "output_tokens": 8}
        });
        let completion = parse_anthropic_response(&body, "claude-3-opus-20240229");
        assert_eq!(completion.response, ChatResponse::Content("Rest and fluids.".into()));
        assert_eq!(completion.usage.total_tokens, 20);
    }

    #[test]
    fn test_parse_google_response() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "Drink water."}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3, "totalTokenCount": 8}
        });
        let completion = parse_google_response(&body).unwrap();
        assert_eq!(completion.response.content(), "Drink water.");
        assert_eq!(completion.usage.total_tokens, 8);

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(parse_google_response(&blocked).unwrap_err().to_string().contains("SAFETY"));
    }
}
