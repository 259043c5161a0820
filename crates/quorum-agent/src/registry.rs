use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use quorum_core::types::{AgentHandle, AgentLookup, AgentState, CallContext, Message};

use crate::agent::ReasoningAgent;

/// Concurrent directory of live agents.
///
/// Besides the id map it keeps a reverse index by agent type, the most
/// recently activated agent, and the call-context bindings that let a tool
/// find the agent that issued it. Shared as `Arc<AgentRegistry>`.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<ReasoningAgent>>,
    by_type: DashMap<String, Vec<String>>,
    bindings: DashMap<String, String>,
    last_active: RwLock<Option<String>>,
}

/// Keeps a call id bound to an agent until dropped.
#[must_use = "the binding is released as soon as the guard is dropped"]
pub struct CallBinding {
    registry: Arc<AgentRegistry>,
    call_id: String,
}

impl Drop for CallBinding {
    fn drop(&mut self) {
        self.registry.bindings.remove(&self.call_id);
        debug!(call_id = %self.call_id, "Released call binding");
    }
}

/// Unregisters an agent when dropped, unwinding included.
#[must_use = "the agent is unregistered as soon as the guard is dropped"]
pub struct Registration {
    registry: Arc<AgentRegistry>,
    agent_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister(&self.agent_id).is_some() {
            debug!(agent_id = %self.agent_id, "Released agent registration");
        }
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, replacing any agent with the same id.
    pub fn register(&self, agent: Arc<ReasoningAgent>) {
        let id = agent.id().to_string();
        let kind = agent.kind().to_string();
        if let Some(old) = self.agents.insert(id.clone(), agent) {
            self.remove_from_type(old.kind(), &id);
        }
        self.by_type.entry(kind.clone()).or_default().push(id.clone());
        *self.last_active.write() = Some(id.clone());
        info!(agent_id = %id, kind = %kind, "Registered agent");
    }

    /// Remove an agent and every index entry that refers to it.
    pub fn unregister(&self, agent_id: &str) -> Option<Arc<ReasoningAgent>> {
        let (_, agent) = self.agents.remove(agent_id)?;
        self.remove_from_type(agent.kind(), agent_id);
        self.bindings.retain(|_, bound| bound.as_str() != agent_id);
        {
            let mut last = self.last_active.write();
            if last.as_deref() == Some(agent_id) {
                *last = None;
            }
        }
        info!(agent_id, "Unregistered agent");
        Some(agent)
    }

    fn remove_from_type(&self, kind: &str, agent_id: &str) {
        let now_empty = match self.by_type.get_mut(kind) {
            Some(mut ids) => {
                ids.retain(|id| id != agent_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_type.remove_if(kind, |_, ids| ids.is_empty());
        }
    }

    pub fn clear(&self) {
        self.agents.clear();
        self.by_type.clear();
        self.bindings.clear();
        *self.last_active.write() = None;
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<ReasoningAgent>> {
        self.agents.get(agent_id).map(|a| Arc::clone(a.value()))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    pub fn all_agents(&self) -> Vec<Arc<ReasoningAgent>> {
        self.agents.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn agents_by_state(&self, state: AgentState) -> Vec<Arc<ReasoningAgent>> {
        self.all_agents()
            .into_iter()
            .filter(|a| a.state() == state)
            .collect()
    }

    pub fn agents_by_type(&self, kind: &str) -> Vec<Arc<ReasoningAgent>> {
        let ids = match self.by_type.get(kind) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Registered agent types, sorted.
    pub fn available_types(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.by_type.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    /// Record `agent_id` as the most recently activated agent.
    pub fn mark_active(&self, agent_id: &str) {
        if self.agents.contains_key(agent_id) {
            *self.last_active.write() = Some(agent_id.to_string());
        }
    }

    /// Append a user message to an agent's memory. Returns false if the
    /// agent is not registered.
    pub fn send_message_to_agent(&self, agent_id: &str, text: &str) -> bool {
        match self.get(agent_id) {
            Some(agent) => {
                agent.add_message(Message::user(text));
                true
            }
            None => false,
        }
    }

    /// Keep `agent_id` registered until the returned guard is dropped.
    pub fn registration(self: &Arc<Self>, agent_id: &str) -> Registration {
        Registration {
            registry: Arc::clone(self),
            agent_id: agent_id.to_string(),
        }
    }

    /// Bind `call` to `agent_id` until the returned guard is dropped.
    pub fn bind_call(self: &Arc<Self>, call: &CallContext, agent_id: &str) -> CallBinding {
        self.bindings.insert(call.call_id.clone(), agent_id.to_string());
        debug!(call_id = %call.call_id, agent_id, "Bound call context");
        CallBinding {
            registry: Arc::clone(self),
            call_id: call.call_id.clone(),
        }
    }

    /// The agent executing `call`; otherwise any running agent; otherwise
    /// the most recently activated one; otherwise any registered agent.
    pub fn current_agent(&self, call: Option<&CallContext>) -> Option<Arc<ReasoningAgent>> {
        if let Some(call) = call {
            let bound = self.bindings.get(&call.call_id).map(|id| id.value().clone());
            if let Some(agent) = bound.and_then(|id| self.get(&id)) {
                return Some(agent);
            }
        }

        if let Some(running) = self
            .agents
            .iter()
            .find(|e| e.value().state() == AgentState::Running)
            .map(|e| Arc::clone(e.value()))
        {
            return Some(running);
        }

        let last = self.last_active.read().clone();
        if let Some(agent) = last.and_then(|id| self.get(&id)) {
            return Some(agent);
        }

        self.agents.iter().next().map(|e| Arc::clone(e.value()))
    }
}

impl AgentLookup for AgentRegistry {
    fn agent(&self, agent_id: &str) -> Option<Arc<dyn AgentHandle>> {
        self.get(agent_id).map(|a| a as Arc<dyn AgentHandle>)
    }

    fn current_agent(&self, call: Option<&CallContext>) -> Option<Arc<dyn AgentHandle>> {
        AgentRegistry::current_agent(self, call).map(|a| a as Arc<dyn AgentHandle>)
    }
}
