use futures::future::BoxFuture;
use serde_json::json;

use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::Tool;
use quorum_core::types::{ToolContext, ToolResult};

const MAX_KEY_POINTS: u64 = 5;

/// Simulated text summary at one of three lengths.
pub struct TextSummaryTool;

impl Tool for TextSummaryTool {
    fn name(&self) -> &str {
        "summarize_text"
    }

    fn description(&self) -> &str {
        "Summarize a long text and extract its key information."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The text to summarize"},
                "length": {
                    "type": "string",
                    "enum": ["short", "medium", "long"],
                    "description": "Summary length"
                }
            },
            "required": ["text"]
        })
    }

    fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let text = input["text"]
                .as_str()
                .ok_or_else(|| QuorumError::ToolValidation("'text' must be a string".into()))?;
            let length = input["length"].as_str().unwrap_or("standard");

            let summary = match length.to_ascii_lowercase().as_str() {
                "short" => "Short summary: an overview of the core topic.",
                "medium" => "Medium summary: the text covers its main points, key arguments and conclusions.",
                "long" => {
                    "Detailed summary: the text first sets out the background and problem, \
                     then analyses the relevant factors, and closes with concrete conclusions."
                }
                _ => "Standard summary: the key points of the text were extracted.",
            };

            Ok(ToolResult::success(format!(
                "Text summary (source length: {} characters, length: {}):\n\n{}",
                text.chars().count(),
                length,
                summary
            )))
        })
    }
}

/// Simulated key-point extraction, capped at five points.
pub struct ExtractKeyPointsTool;

impl Tool for ExtractKeyPointsTool {
    fn name(&self) -> &str {
        "extract_key_points"
    }

    fn description(&self) -> &str {
        "Extract the key points from a text."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The text to extract from"},
                "count": {"type": "integer", "description": "Number of points (max 5)", "default": 3}
            },
            "required": ["content"]
        })
    }

    fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let content = input["content"]
                .as_str()
                .ok_or_else(|| QuorumError::ToolValidation("'content' must be a string".into()))?;
            let count = input["count"].as_u64().unwrap_or(3).min(MAX_KEY_POINTS);

            let mut out = String::from("Key points:\n");
            for i in 1..=count {
                out.push_str(&format!("{}. Key point {} extracted from the source\n", i, i));
            }
            out.push_str(&format!(
                "\nExtracted {} key points (source length: {} characters)",
                count,
                content.chars().count()
            ));
            Ok(ToolResult::success(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::types::SessionId;

    #[tokio::test]
    async fn key_points_are_capped() {
        let result = ExtractKeyPointsTool
            .execute(json!({"content": "abc", "count": 9}), ToolContext::new(SessionId::new()))
            .await
            .unwrap();
        assert!(result.content.contains("5. Key point 5"));
        assert!(!result.content.contains("6. Key point"));
    }

    #[tokio::test]
    async fn summary_length_selects_text() {
        let result = TextSummaryTool
            .execute(json!({"text": "hello", "length": "SHORT"}), ToolContext::new(SessionId::new()))
            .await
            .unwrap();
        assert!(result.content.contains("Short summary"));
        assert!(result.content.contains("5 characters"));
    }
}
