use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use quorum_core::config::ModelConfig;
use quorum_core::error::Result;
use quorum_core::traits::LlmClient;
use quorum_core::types::{Message, Role};

use crate::graph::{keys, Node, RunConfig, SessionState, StateUpdate};

use super::{complete, SUMMARY_NODE};

/// Writes the final reply and ends the run.
pub struct SummaryNode {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    system_prompt: String,
}

impl SummaryNode {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig, system_prompt: String) -> Self {
        Self {
            llm,
            model,
            system_prompt,
        }
    }

    pub fn build_context(&self, state: &SessionState) -> String {
        let mut context = format!("User question: {}\n", state.user_input());

        let history = state.session_history();
        if state.has_history() && !history.is_empty() {
            context.push_str("\nThis question follows an earlier conversation:\n");
            for (i, message) in history.iter().enumerate() {
                let speaker = if message.role() == Role::User { "User" } else { "Assistant" };
                context.push_str(&format!("{}. {}: {}\n", i + 1, speaker, message.content()));
            }
            context.push_str("The user may be asking about something said earlier.\n");
        }

        let gathered = state.tool_results();
        if !gathered.is_empty() {
            context.push_str("Available information:\n");
            context.push_str(&gathered.join("\n"));
            context.push_str("\nWrite a complete, useful reply based on the information above.");
        } else if state.has_history() {
            context.push_str("Write a helpful reply using the conversation history above.");
        } else {
            context.push_str("Answer the user's question directly and helpfully.");
        }

        context
    }
}

impl Node for SummaryNode {
    fn name(&self) -> &str {
        SUMMARY_NODE
    }

    fn writes(&self) -> &[&'static str] {
        &[keys::CURRENT_AGENT, keys::RESULT, keys::FINISHED, keys::MESSAGES]
    }

    fn run<'a>(
        &'a self,
        state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>> {
        Box::pin(async move {
            let context = self.build_context(state);
            let reply = complete(self.llm.as_ref(), &self.model, &self.system_prompt, context).await?;
            info!(thread_id = %config.thread_id, chars = reply.len(), "Summary written");

            Ok(StateUpdate::new()
                .current_agent(SUMMARY_NODE)
                .result(reply.clone())
                .finished(true)
                .message(Message::assistant(reply)))
        })
    }
}
