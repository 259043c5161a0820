use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{error, info};

use quorum_core::error::{QuorumError, Result};
use quorum_core::types::Message;

use crate::graph::{keys, Node, RunConfig, SessionState, StateUpdate};
use crate::nodes::COORDINATOR_NODE;

use super::client::A2aClient;

/// Delegates one graph step to a skill of a remote agent.
///
/// Availability and the skill are checked on every invocation, so a remote
/// agent that is down at startup can still serve later runs.
pub struct RemoteAgentNode {
    name: String,
    agent_id: String,
    skill_id: String,
    client: Arc<dyn A2aClient>,
}

impl RemoteAgentNode {
    pub fn new(client: Arc<dyn A2aClient>, agent_id: &str, skill_id: &str) -> Self {
        Self {
            name: Self::node_name(agent_id, skill_id),
            agent_id: agent_id.to_string(),
            skill_id: skill_id.to_string(),
            client,
        }
    }

    pub fn node_name(agent_id: &str, skill_id: &str) -> String {
        format!("{}_{}", agent_id, skill_id)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn skill_id(&self) -> &str {
        &self.skill_id
    }

    async fn invoke(&self, state: &SessionState) -> Result<String> {
        if !self.client.check_availability(&self.agent_id).await? {
            return Err(QuorumError::Remote {
                agent: self.agent_id.clone(),
                message: "agent is unavailable".into(),
            });
        }

        let capabilities = self.client.capabilities(&self.agent_id).await?;
        if !capabilities.has_skill(&self.skill_id) {
            return Err(QuorumError::Remote {
                agent: self.agent_id.clone(),
                message: format!("skill '{}' is not offered", self.skill_id),
            });
        }

        let history = serde_json::to_value(state.session_history())?;
        let params = json!({
            "userInput": state.user_input(),
            "history": history,
            "context": history,
        });
        self.client
            .invoke_skill(&self.agent_id, &self.skill_id, params)
            .await
    }
}

impl Node for RemoteAgentNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn writes(&self) -> &[&'static str] {
        &[
            keys::CURRENT_AGENT,
            keys::RESULT,
            keys::NEXT,
            keys::FINISHED,
            keys::MESSAGES,
            keys::SESSION_HISTORY,
            keys::ERROR,
        ]
    }

    fn run<'a>(
        &'a self,
        state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            match self.invoke(state).await {
                Ok(reply) => {
                    info!(
                        agent_id = %self.agent_id,
                        skill = %self.skill_id,
                        thread_id = %config.thread_id,
                        "Remote agent replied"
                    );
                    Ok(StateUpdate::new()
                        .current_agent(self.agent_id.clone())
                        .result(reply.clone())
                        .next(COORDINATOR_NODE)
                        .finished(false)
                        .message(Message::assistant(reply.clone()))
                        .session_message(Message::assistant(reply)))
                }
                Err(e) => Ok(self.on_error(&e)),
            }
        })
    }

    fn on_error(&self, e: &QuorumError) -> StateUpdate {
        error!(agent_id = %self.agent_id, skill = %self.skill_id, error = %e, "Remote agent invocation failed");
        let text = format!("remote agent invocation failed: {}", e);
        StateUpdate::new()
            .message(Message::assistant(text.clone()))
            .error(text)
            .next(COORDINATOR_NODE)
            .finished(true)
    }
}
