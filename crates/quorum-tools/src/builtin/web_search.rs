use futures::future::BoxFuture;
use serde_json::json;

use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::Tool;
use quorum_core::types::{ToolContext, ToolResult};

enum Backend {
    Http {
        endpoint: String,
        api_key: String,
        http: reqwest::Client,
    },
    Simulated,
}

/// Web search for the search agent.
///
/// With an API key it posts to a Tavily-compatible endpoint. Without one it
/// returns placeholder results so the workflow still runs offline.
pub struct WebSearchTool {
    backend: Backend,
}

impl WebSearchTool {
    pub fn http(endpoint: &str, api_key: &str) -> Self {
        Self {
            backend: Backend::Http {
                endpoint: endpoint.to_string(),
                api_key: api_key.to_string(),
                http: reqwest::Client::new(),
            },
        }
    }

    pub fn simulated() -> Self {
        Self {
            backend: Backend::Simulated,
        }
    }
}

fn tool_error(message: impl ToString) -> QuorumError {
    QuorumError::ToolExecution {
        tool: "web_search".into(),
        message: message.to_string(),
    }
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current, accurate information. Use this first whenever \
         the user asks to search for, look up, or learn about anything."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search keywords or question"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let query = input["query"]
                .as_str()
                .ok_or_else(|| QuorumError::ToolValidation("'query' must be a string".into()))?;
            let max = input["max_results"].as_u64().unwrap_or(5);

            let (endpoint, api_key, http) = match &self.backend {
                Backend::Simulated => {
                    let shown = max.min(3);
                    let lines: Vec<String> = (1..=shown)
                        .map(|i| format!("{}. Result {} for \"{}\" (simulated)", i, i, query))
                        .collect();
                    return Ok(ToolResult::success(format!(
                        "Web search results (query: {}, up to {} results):\n{}",
                        query,
                        max,
                        lines.join("\n")
                    )));
                }
                Backend::Http {
                    endpoint,
                    api_key,
                    http,
                } => (endpoint, api_key, http),
            };

            let resp = http
                .post(endpoint)
                .json(&json!({
                    "api_key": api_key,
                    "query": query,
                    "max_results": max,
                }))
                .send()
                .await
                .map_err(tool_error)?;

            let body: serde_json::Value = resp.json().await.map_err(tool_error)?;

            let results = body["results"]
                .as_array()
                .filter(|arr| !arr.is_empty())
                .map(|arr| {
                    arr.iter()
                        .map(|r| {
                            format!(
                                "**{}**\n{}\nURL: {}",
                                r["title"].as_str().unwrap_or(""),
                                r["content"].as_str().unwrap_or(""),
                                r["url"].as_str().unwrap_or("")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n\n---\n\n")
                })
                .unwrap_or_else(|| "No results found.".into());

            Ok(ToolResult::success(results))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::types::SessionId;

    #[tokio::test]
    async fn simulated_backend_echoes_query() {
        let result = WebSearchTool::simulated()
            .execute(json!({"query": "rust async", "max_results": 2}), ToolContext::new(SessionId::new()))
            .await
            .unwrap();
        assert!(result.content.contains("rust async"));
        assert!(result.content.contains("2. Result 2"));
        assert!(!result.content.contains("3. Result 3"));
    }

    #[tokio::test]
    async fn query_is_required() {
        let err = WebSearchTool::simulated()
            .execute(json!({"max_results": 2}), ToolContext::new(SessionId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::ToolValidation(_)));
    }
}
