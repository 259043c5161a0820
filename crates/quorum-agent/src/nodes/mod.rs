//! Workflow nodes.
//!
//! The coordinator and summary nodes are single prompted LLM calls. Agent
//! nodes adapt a freshly built [`ReasoningAgent`](crate::agent::ReasoningAgent)
//! to the node contract. Remote agent nodes live in [`crate::remote`].

pub mod agent_node;
pub mod coordinator;
pub mod human_input;
pub mod route;
pub mod summary;

pub use agent_node::AgentNode;
pub use coordinator::CoordinatorNode;
pub use human_input::HumanInputNode;
pub use route::{route_from_coordinator, NextAction};
pub use summary::SummaryNode;

use quorum_core::config::ModelConfig;
use quorum_core::error::Result;
use quorum_core::traits::LlmClient;
use quorum_core::types::Message;

pub const COORDINATOR_NODE: &str = "coordinator";
pub const SEARCH_NODE: &str = "search_agent";
pub const ANALYSIS_NODE: &str = "analysis_agent";
pub const SUMMARY_NODE: &str = "summary";
pub const HUMAN_INPUT_NODE: &str = "human_input";

/// One system + user exchange without tools.
pub(crate) async fn complete(
    llm: &dyn LlmClient,
    model: &ModelConfig,
    system_prompt: &str,
    input: String,
) -> Result<String> {
    let messages = vec![Message::system(system_prompt), Message::user(input)];
    let response = llm.chat(model, messages, &[]).await?;
    Ok(response.text)
}
