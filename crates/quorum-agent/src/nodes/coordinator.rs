use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use quorum_core::config::ModelConfig;
use quorum_core::error::Result;
use quorum_core::traits::LlmClient;
use quorum_core::types::Message;

use crate::graph::{keys, Node, RunConfig, SessionState, StateUpdate};

use super::{complete, NextAction, COORDINATOR_NODE};

/// Decides the next action from the request and what has been gathered.
pub struct CoordinatorNode {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    system_prompt: String,
    /// Remote node names with a one-line description each.
    remote_nodes: Vec<(String, String)>,
}

impl CoordinatorNode {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig, system_prompt: String) -> Self {
        Self {
            llm,
            model,
            system_prompt,
            remote_nodes: Vec::new(),
        }
    }

    pub fn with_remote_nodes(mut self, nodes: Vec<(String, String)>) -> Self {
        self.remote_nodes = nodes;
        self
    }

    fn remote_names(&self) -> Vec<String> {
        self.remote_nodes.iter().map(|(name, _)| name.clone()).collect()
    }

    /// The user turn sent to the model.
    pub fn build_context(&self, state: &SessionState) -> String {
        let mut context = format!("User request: {}\n", state.user_input());

        if state.has_history() {
            context.push_str(
                "Note: this request continues an earlier conversation; take that history into account.\n",
            );
        }

        let gathered = state.tool_results();
        if !gathered.is_empty() {
            context.push_str("Results gathered so far:\n");
            context.push_str(&gathered.join("\n"));
            context.push('\n');
        }

        if let Some(result) = state.result() {
            context.push_str(&format!("Current result: {}\n", result));
            context.push_str("Decide whether the task is complete or needs more work.\n");
        }

        if !self.remote_nodes.is_empty() {
            context.push_str("Remote agent nodes available as actions:\n");
            for (name, description) in &self.remote_nodes {
                context.push_str(&format!("- {}: {}\n", name, description));
            }
        }

        context
    }
}

impl Node for CoordinatorNode {
    fn name(&self) -> &str {
        COORDINATOR_NODE
    }

    fn writes(&self) -> &[&'static str] {
        &[keys::NEXT, keys::CURRENT_AGENT, keys::MESSAGES]
    }

    fn run<'a>(
        &'a self,
        state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let context = self.build_context(state);
            let reply = complete(self.llm.as_ref(), &self.model, &self.system_prompt, context).await?;
            let action = NextAction::parse(&reply, &self.remote_names());

            info!(thread_id = %config.thread_id, next = %action.as_str(), "Coordinator decided");
            Ok(StateUpdate::new()
                .current_agent(COORDINATOR_NODE)
                .next(action.as_str())
                .message(Message::assistant(format!("Coordinator: {}", reply))))
        })
    }
}
