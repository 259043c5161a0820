use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client: messages in, text plus optional tool calls out.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request. `tools` may be empty.
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatResponse>>;
}

/// A callable tool exposed to the model.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Executes a batch of tool calls on behalf of one agent.
///
/// Failures are folded into error results; a batch never fails as a whole.
pub trait ToolCaller: Send + Sync + 'static {
    fn definitions(&self) -> Vec<ToolDefinition>;

    fn call_tools(&self, calls: Vec<ToolCall>, ctx: ToolContext) -> BoxFuture<'_, Vec<ToolOutcome>>;
}
