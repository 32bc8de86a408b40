//! Server-sent event decoding for streamed chat completions.

use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use super::{ChatStreamEvent, ToolCall};
use crate::usage::TokenUsage;

/// Splits a byte stream into `data:` payloads. Bytes are buffered until a
/// full line arrives so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Provider-specific interpretation of SSE payloads.
pub trait StreamParser: Send + 'static {
    /// Events for one payload, and whether the stream is finished.
    fn handle(&mut self, data: &str) -> (Vec<ChatStreamEvent>, bool);

    /// Flush anything still buffered. Always ends with `Done`.
    fn finish(&mut self) -> Vec<ChatStreamEvent>;
}

/// Forward a streaming HTTP response through `parser` into a channel.
pub fn pump<P: StreamParser>(
    response: reqwest::Response,
    mut parser: P,
) -> mpsc::Receiver<ChatStreamEvent> {
    let (tx, rx) = mpsc::channel::<ChatStreamEvent>(256);
    let mut byte_stream = response.bytes_stream();

    tokio::spawn(async move {
        let mut lines = SseLineBuffer::default();

        'outer: while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Chat stream interrupted: {}", e);
                    break;
                }
            };

            for data in lines.push(&chunk) {
                let (events, done) = parser.handle(&data);
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                if done {
                    break 'outer;
                }
            }
        }

        for event in parser.finish() {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    rx
}

/// OpenAI chat completions stream: content deltas, tool call deltas
/// accumulated by index, and a trailing usage chunk.
#[derive(Debug, Default)]
pub struct OpenAIStreamParser {
    model: String,
    tool_calls: BTreeMap<u64, (String, String, String)>,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl OpenAIStreamParser {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl StreamParser for OpenAIStreamParser {
    fn handle(&mut self, data: &str) -> (Vec<ChatStreamEvent>, bool) {
        if data == "[DONE]" {
            return (Vec::new(), true);
        }

        let Ok(parsed) = serde_json::from_str::<Value>(data) else {
            return (Vec::new(), false);
        };

        if let Some(usage) = parsed.get("usage").filter(|u| u.is_object()) {
            self.usage = Some(super::external::openai_usage(usage, &self.model));
        }

        let mut events = Vec::new();
        let delta = &parsed["choices"][0]["delta"];

        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                events.push(ChatStreamEvent::ContentDelta(content.to_string()));
            }
        }

        if let Some(deltas) = delta["tool_calls"].as_array() {
            for tc_delta in deltas {
                let idx = tc_delta["index"].as_u64().unwrap_or(0);
                let entry = self.tool_calls.entry(idx).or_default();
                if let Some(id) = tc_delta["id"].as_str().filter(|s| !s.is_empty()) {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc_delta["function"]["name"].as_str().filter(|s| !s.is_empty()) {
                    entry.1 = name.to_string();
                }
                if let Some(args) = tc_delta["function"]["arguments"].as_str() {
                    entry.2.push_str(args);
                }
            }
        }

        (events, false)
    }

    fn finish(&mut self) -> Vec<ChatStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events: Vec<ChatStreamEvent> = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|(id, name, arguments)| ChatStreamEvent::ToolCallComplete(ToolCall { id, name, arguments }))
            .collect();
        if let Some(usage) = self.usage.take() {
            events.push(ChatStreamEvent::Usage(usage));
        }
        events.push(ChatStreamEvent::Done);
        events
    }
}

/// Anthropic messages stream: content blocks plus usage split across
/// `message_start` (input) and `message_delta` (output).
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    model: String,
    current_tool: Option<(String, String, String)>,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl AnthropicStreamParser {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl StreamParser for AnthropicStreamParser {
    fn handle(&mut self, data: &str) -> (Vec<ChatStreamEvent>, bool) {
        let Ok(parsed) = serde_json::from_str::<Value>(data) else {
            return (Vec::new(), false);
        };

        let mut events = Vec::new();
        match parsed["type"].as_str() {
            Some("message_start") => {
                let usage = &parsed["message"]["usage"];
                self.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
            }
            Some("content_block_start") => {
                let block = &parsed["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.current_tool = Some((
                        block["id"].as_str().unwrap_or_default().to_string(),
                        block["name"].as_str().unwrap_or_default().to_string(),
                        String::new(),
                    ));
                }
            }
            Some("content_block_delta") => {
                let delta = &parsed["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(ChatStreamEvent::ContentDelta(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(tool), Some(partial)) =
                            (self.current_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.2.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some((id, name, mut arguments)) = self.current_tool.take() {
                    if arguments.is_empty() {
                        arguments = "{}".to_string();
                    }
                    events.push(ChatStreamEvent::ToolCallComplete(ToolCall { id, name, arguments }));
                }
            }
            Some("message_delta") => {
                if let Some(output) = parsed["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = output;
                }
            }
            Some("message_stop") => return (events, true),
            Some("error") => {
                tracing::warn!("Anthropic stream error: {}", parsed["error"]);
            }
            _ => {}
        }

        (events, false)
    }

    fn finish(&mut self) -> Vec<ChatStreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = Vec::new();
        if self.input_tokens > 0 || self.output_tokens > 0 {
            events.push(ChatStreamEvent::Usage(
                TokenUsage::new(self.input_tokens, self.output_tokens).priced(&self.model),
            ));
        }
        events.push(ChatStreamEvent::Done);
        events
    }
}
