//! Shared test utilities for Quorum crates.
//!
//! [`ScriptedLlm`] replays queued responses without any HTTP calls and
//! records every request it receives.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use quorum_core::config::{AppConfig, ModelConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::LlmClient;
use quorum_core::types::{ChatResponse, Message, ToolCall, ToolDefinition};

/// Text returned once the script runs out.
pub const EXHAUSTED_REPLY: &str = "(scripted: no more queued responses)";

/// One queued reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ChatResponse),
    Error(String),
    TokenLimit,
}

/// A request the scripted client received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

impl RecordedRequest {
    /// Concatenated content of every message, for substring assertions.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role(), m.content()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// An LLM client that replays a fixed script.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    fallback: Option<ChatResponse>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text reply.
    pub fn with_text(self, text: &str) -> Self {
        self.push(Scripted::Reply(ChatResponse::text(text)))
    }

    /// Queue a raw reply as-is.
    pub fn with_response(self, response: ChatResponse) -> Self {
        self.push(Scripted::Reply(response))
    }

    /// Queue a reply requesting one tool call.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.with_tool_calls("", vec![(name, args)])
    }

    /// Queue a reply with optional text and several tool calls.
    pub fn with_tool_calls(self, text: &str, calls: Vec<(&str, serde_json::Value)>) -> Self {
        let tool_calls = calls
            .into_iter()
            .map(|(name, arguments)| ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: name.to_string(),
                arguments,
            })
            .collect();
        self.push(Scripted::Reply(ChatResponse {
            text: text.to_string(),
            tool_calls,
            usage: None,
        }))
    }

    /// Queue a request failure.
    pub fn with_error(self, message: &str) -> Self {
        self.push(Scripted::Error(message.to_string()))
    }

    /// Queue a token-limit failure.
    pub fn with_token_limit(self) -> Self {
        self.push(Scripted::TokenLimit)
    }

    /// Reply with `text` forever once the queue is empty.
    pub fn repeating(mut self, text: &str) -> Self {
        self.fallback = Some(ChatResponse::text(text));
        self
    }

    fn push(self, item: Scripted) -> Self {
        self.script.lock().push_back(item);
        self
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat(
        &self,
        _config: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatResponse>> {
        self.requests.lock().push(RecordedRequest {
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let next = self.script.lock().pop_front();
        let fallback = self.fallback.clone();

        Box::pin(async move {
            match next {
                Some(Scripted::Reply(resp)) => Ok(resp),
                Some(Scripted::Error(msg)) => Err(QuorumError::LlmRequest(msg)),
                Some(Scripted::TokenLimit) => Err(QuorumError::TokenLimitExceeded(
                    "scripted context overflow".into(),
                )),
                None => Ok(fallback.unwrap_or_else(|| ChatResponse::text(EXHAUSTED_REPLY))),
            }
        })
    }
}

/// A config suitable for tests: defaults everywhere, a dummy model.
pub fn test_config() -> AppConfig {
    AppConfig::with_model(ModelConfig::new("scripted-model"))
}
