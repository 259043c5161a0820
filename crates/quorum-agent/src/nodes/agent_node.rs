use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{error, info};

use quorum_core::error::{QuorumError, Result};
use quorum_core::types::{Message, Role};
use quorum_tools::builtin::preview;

use crate::factory::AgentFactory;
use crate::graph::{keys, Node, RunConfig, SessionState, StateUpdate};

use super::COORDINATOR_NODE;

/// Runs a fresh reasoning agent of one kind as a graph node.
///
/// Each invocation builds, initializes, and runs a new agent, which leaves
/// the registry when the node returns or unwinds. The agent's reply becomes the node's `result` and
/// is appended to `toolResults` as `"{kind}: {reply}"`.
pub struct AgentNode {
    name: String,
    kind: String,
    factory: Arc<AgentFactory>,
    history_preview_chars: usize,
}

impl AgentNode {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, factory: Arc<AgentFactory>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            factory,
            history_preview_chars: 100,
        }
    }

    pub fn with_history_preview(mut self, chars: usize) -> Self {
        self.history_preview_chars = chars;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The request handed to the agent, prefixed by recent history.
    pub fn build_request(&self, state: &SessionState) -> String {
        let input = state.user_input();
        let history = state.session_history();
        if !state.has_history() || history.is_empty() {
            return input.to_string();
        }

        let mut request = String::from("[Conversation so far]\n");
        for message in history {
            let speaker = match message.role() {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
                Role::Tool => "Tool",
            };
            request.push_str(&format!(
                "{}: {}\n",
                speaker,
                preview(message.content(), self.history_preview_chars)
            ));
        }
        request.push_str("[End of history]\n\n[Current request]\n");
        request.push_str(input);
        request
    }
}

impl Node for AgentNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &[&'static str] {
        &[
            keys::CURRENT_AGENT,
            keys::TOOL_RESULTS,
            keys::RESULT,
            keys::NEXT,
            keys::MESSAGES,
        ]
    }

    fn run<'a>(
        &'a self,
        state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let agent = Arc::new(self.factory.create(&self.kind, &config.session_id)?);
            agent.initialize()?;
            let _registration = self.factory.registry().registration(agent.id());
            info!(
                node = %self.name,
                agent_id = %agent.id(),
                thread_id = %config.thread_id,
                "Running agent node"
            );

            let reply = agent.run(&self.build_request(state)).await?;

            Ok(StateUpdate::new()
                .current_agent(self.kind.clone())
                .tool_result(format!("{}: {}", self.kind, reply))
                .result(reply.clone())
                .next(COORDINATOR_NODE)
                .message(Message::assistant(reply)))
        })
    }

    fn on_error(&self, e: &QuorumError) -> StateUpdate {
        error!(node = %self.name, error = %e, "Agent node failed");
        StateUpdate::new()
            .error(format!("agent node failed: {}", e))
            .message(Message::assistant(format!("Agent node {} failed: {}", self.name, e)))
            .finished(true)
    }
}
