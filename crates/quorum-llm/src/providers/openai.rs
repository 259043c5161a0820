use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quorum_core::config::ModelConfig;
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::LlmClient;
use quorum_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug, PartialEq)]
struct OaiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct OaiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: OaiFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_messages(messages: &[Message]) -> Vec<OaiMessage> {
    messages
        .iter()
        .map(|msg| {
            let text = msg.content();
            let content = match (msg.image(), msg.role()) {
                (Some(image), Role::User) => Some(serde_json::json!([
                    {"type": "text", "text": text},
                    {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{}", image)}}
                ])),
                _ if text.is_empty() && !msg.tool_calls().is_empty() => None,
                _ => Some(serde_json::Value::String(text.to_string())),
            };
            let tool_calls = (!msg.tool_calls().is_empty()).then(|| {
                msg.tool_calls()
                    .iter()
                    .map(|c| OaiToolCall {
                        id: c.id.clone(),
                        r#type: function_type(),
                        function: OaiFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            OaiMessage {
                role: msg.role().as_str(),
                content,
                tool_calls,
                tool_call_id: msg.tool_call_id().map(str::to_string),
            }
        })
        .collect()
}

fn parse_completion(completion: ChatCompletion) -> Result<ChatResponse> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| QuorumError::LlmParse("response contained no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            let arguments = if c.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&c.function.arguments).map_err(|e| {
                    QuorumError::LlmParse(format!("tool call '{}' arguments: {}", c.function.name, e))
                })?
            };
            // Some OpenAI-compatible servers omit call ids; tool replies need one.
            let id = if c.id.trim().is_empty() {
                format!("call_{}", i)
            } else {
                c.id
            };
            Ok(ToolCall {
                id,
                name: c.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ChatResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: completion.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

fn is_context_overflow(body: &str) -> bool {
    body.contains("context_length_exceeded") || body.contains("maximum context length")
}

impl LlmClient for OpenAiClient {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatResponse>> {
        let config = config.clone();
        let tools = convert_tools(tools);

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(&messages),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                tools,
            };

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(model = %config.model_id, messages = messages.len(), "Sending chat request");

            let response = req
                .send()
                .await
                .map_err(|e| QuorumError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                if status.as_u16() == 400 && is_context_overflow(&body) {
                    return Err(QuorumError::TokenLimitExceeded(body));
                }
                return Err(QuorumError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let completion: ChatCompletion = response
                .json()
                .await
                .map_err(|e| QuorumError::LlmParse(e.to_string()))?;

            parse_completion(completion)
        })
    }
}
