use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::Tool;
use quorum_core::types::{ToolContext, ToolResult};

/// Name the reasoning loop watches for to stop acting.
pub const TERMINATE_TOOL: &str = "terminate";

/// Ends the invoking agent's interaction.
///
/// The agent is looked up by the optional `agent_id` argument first, then
/// through the registry's call-context resolution. A status-specific
/// closing message is written to the agent's memory and the agent is marked
/// finished.
pub struct TerminateTool;

fn closing_message(status: &str) -> &'static str {
    if status.eq_ignore_ascii_case("success") {
        "The task has been completed successfully. Thank you!"
    } else if status.eq_ignore_ascii_case("failure") {
        "Sorry, I cannot continue with this task. If there is anything else I can help with, please ask again."
    } else {
        "The interaction has ended. Feel free to ask if you have other questions."
    }
}

impl Tool for TerminateTool {
    fn name(&self) -> &str {
        TERMINATE_TOOL
    }

    fn description(&self) -> &str {
        "Terminate the current interaction. Call this only after all work is done \
         and the specialized tools have produced their results. Always pass your agent ID."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The finish status of the interaction",
                    "enum": ["success", "failure"]
                },
                "agent_id": {
                    "type": "string",
                    "description": "The ID of the agent to terminate. Defaults to the calling agent"
                }
            },
            "required": ["status"]
        })
    }

    fn timeout_secs(&self) -> u64 {
        5
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let status = input["status"]
                .as_str()
                .ok_or_else(|| QuorumError::ToolValidation("'status' must be a string".into()))?;
            let requested = input["agent_id"].as_str().filter(|s| !s.is_empty());

            let agents = ctx.agents.as_ref().ok_or_else(|| QuorumError::ToolExecution {
                tool: TERMINATE_TOOL.into(),
                message: "Agent registry not available".into(),
            })?;

            let by_id = requested.and_then(|id| agents.agent(id));
            if let (Some(id), None) = (requested, &by_id) {
                warn!(agent_id = %id, "terminate: agent id not registered, resolving from call context");
            }

            let Some(agent) = by_id.or_else(|| agents.current_agent(ctx.call.as_ref())) else {
                warn!("terminate: no agent found to terminate");
                return Ok(ToolResult::error(
                    "Unable to terminate the interaction: no running agent found",
                ));
            };

            agent.finish(closing_message(status));
            info!(agent_id = %agent.agent_id(), status, "Agent interaction terminated");

            Ok(ToolResult::success(format!(
                "Terminated the current interaction with status: {}",
                status
            )))
        })
    }
}
