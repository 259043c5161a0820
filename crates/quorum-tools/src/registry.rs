use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error};

use quorum_core::config::AppConfig;
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::{Tool, ToolCaller};
use quorum_core::types::{ToolCall, ToolContext, ToolDefinition, ToolOutcome, ToolResult};

use crate::builtin::{
    DataAnalysisTool, ExtractKeyPointsTool, StatisticsReportTool, TerminateTool,
    TextSummaryTool, WebSearchTool,
};

/// Registry of available tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register an already shared tool.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A registry holding only the named tools. Unknown names are skipped.
    pub fn subset(&self, names: &[String]) -> Self {
        let tools = names
            .iter()
            .filter_map(|n| self.tools.get(n).map(|t| (n.clone(), Arc::clone(t))))
            .collect();
        Self { tools }
    }

    /// Get tool definitions for sending to the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| QuorumError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(QuorumError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    ///
    /// `web_search` calls the configured HTTP endpoint when an API key is
    /// present and returns simulated results otherwise.
    pub fn with_builtins(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        registry.register(TerminateTool);
        registry.register(match &config.web_search {
            Some(ws) => WebSearchTool::http(&ws.endpoint, &ws.api_key),
            None => WebSearchTool::simulated(),
        });
        registry.register(DataAnalysisTool);
        registry.register(StatisticsReportTool);
        registry.register(TextSummaryTool);
        registry.register(ExtractKeyPointsTool);

        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCaller for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolRegistry::definitions(self)
    }

    /// Calls run one after another in request order so a `terminate` call
    /// observes the effects of the calls before it. A panicking tool yields
    /// an error result like any other failure.
    fn call_tools(&self, calls: Vec<ToolCall>, ctx: ToolContext) -> BoxFuture<'_, Vec<ToolOutcome>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                debug!(tool = %call.name, call_id = %call.id, "Executing tool");
                let run = self.execute(&call.name, call.arguments.clone(), ctx.clone());
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(r)) => r,
                    Ok(Err(e)) => {
                        error!(tool = %call.name, error = %e, "Tool execution failed");
                        ToolResult::error(e.to_string())
                    }
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(tool = %call.name, panic = %message, "Tool panicked");
                        let err = QuorumError::ToolExecution {
                            tool: call.name.clone(),
                            message: format!("panicked: {}", message),
                        };
                        ToolResult::error(err.to_string())
                    }
                };
                outcomes.push(ToolOutcome { call, result });
            }
            outcomes
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::types::SessionId;
    use quorum_test_utils::test_config;
    use serde_json::json;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps past its timeout"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn timeout_secs(&self) -> u64 {
            1
        }

        fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(ToolResult::success("done"))
            })
        }
    }

    struct PanicTool;

    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async { panic!("tool exploded") })
        }
    }

    #[tokio::test]
    async fn panicking_tool_does_not_fail_the_batch() {
        let mut registry = ToolRegistry::new();
        registry.register(PanicTool);
        registry.register(TerminateTool);
        let calls = vec![
            ToolCall {
                id: "c1".into(),
                name: "explode".into(),
                arguments: json!({}),
            },
            ToolCall {
                id: "c2".into(),
                name: "nope".into(),
                arguments: json!({}),
            },
        ];

        let outcomes = registry.call_tools(calls, ToolContext::new(SessionId::new())).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_error);
        assert!(outcomes[0].result.content.contains("explode: panicked: tool exploded"));
        assert!(outcomes[1].result.content.contains("Tool not found: nope"));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins(&test_config());
        assert_eq!(
            registry.list(),
            vec![
                "analyze_data",
                "extract_key_points",
                "statistics_report",
                "summarize_text",
                "terminate",
                "web_search"
            ]
        );
    }

    #[test]
    fn subset_keeps_only_known_names() {
        let registry = ToolRegistry::with_builtins(&test_config());
        let sub = registry.subset(&["terminate".to_string(), "missing".to_string()]);
        assert_eq!(sub.list(), vec!["terminate"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_folded_into_error_outcome() {
        let registry = ToolRegistry::new();
        let calls = vec![ToolCall {
            id: "c1".into(),
            name: "nope".into(),
            arguments: json!({}),
        }];
        let outcomes = registry.call_tools(calls, ToolContext::new(SessionId::new())).await;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_error);
        assert!(outcomes[0].result.content.contains("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let err = registry
            .execute("slow", json!({}), ToolContext::new(SessionId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, QuorumError::ToolTimeout { timeout_secs: 1, .. }));
    }
}
