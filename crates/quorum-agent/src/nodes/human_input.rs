use futures::future::BoxFuture;
use tracing::info;

use quorum_core::error::Result;
use quorum_core::types::Message;

use crate::graph::{keys, Node, RunConfig, SessionState, StateUpdate};

use super::{COORDINATOR_NODE, HUMAN_INPUT_NODE};

pub const CLARIFY_PROMPT: &str = "Please provide more details or clarify your request.";

/// Notes that the user must clarify, then hands back to the coordinator.
#[derive(Debug, Default)]
pub struct HumanInputNode;

impl Node for HumanInputNode {
    fn name(&self) -> &str {
        HUMAN_INPUT_NODE
    }

    fn writes(&self) -> &[&'static str] {
        &[keys::CURRENT_AGENT, keys::NEXT, keys::MESSAGES]
    }

    fn run<'a>(
        &'a self,
        _state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            info!(thread_id = %config.thread_id, "Requesting clarification");
            Ok(StateUpdate::new()
                .current_agent(HUMAN_INPUT_NODE)
                .next(COORDINATOR_NODE)
                .message(Message::assistant(CLARIFY_PROMPT)))
        })
    }
}
