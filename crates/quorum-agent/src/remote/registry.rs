use dashmap::DashMap;
use tracing::info;

use quorum_core::config::RemoteAgentConfig;
use quorum_core::error::{QuorumError, Result};

use super::card::{AgentCapabilities, SkillDescriptor};

#[derive(Debug, Clone)]
struct RemoteEntry {
    endpoint: String,
    capabilities: AgentCapabilities,
}

/// Directory of remote agents: endpoint plus the capabilities they were
/// registered with.
#[derive(Debug, Default)]
pub struct A2aRegistry {
    agents: DashMap<String, RemoteEntry>,
}

impl A2aRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every `[[remote_agents]]` entry. Skills are known by id only
    /// until the agent's card is fetched.
    pub fn from_config(remote_agents: &[RemoteAgentConfig]) -> Self {
        let registry = Self::new();
        for agent in remote_agents {
            let capabilities = AgentCapabilities {
                agent_id: agent.id.clone(),
                name: agent.name.clone(),
                description: agent.description.clone(),
                skills: agent.skills.iter().map(SkillDescriptor::new).collect(),
                ..AgentCapabilities::default()
            };
            registry.register(&agent.id, &agent.endpoint, capabilities);
        }
        registry
    }

    pub fn register(&self, agent_id: &str, endpoint: &str, capabilities: AgentCapabilities) {
        info!(agent_id, endpoint, "Registered remote agent");
        self.agents.insert(
            agent_id.to_string(),
            RemoteEntry {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                capabilities,
            },
        );
    }

    pub fn unregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.remove(agent_id).is_some();
        if removed {
            info!(agent_id, "Unregistered remote agent");
        }
        removed
    }

    pub fn endpoint(&self, agent_id: &str) -> Result<String> {
        self.agents
            .get(agent_id)
            .map(|e| e.endpoint.clone())
            .ok_or_else(|| QuorumError::AgentNotFound(format!("remote agent '{}'", agent_id)))
    }

    pub fn capabilities(&self, agent_id: &str) -> Result<AgentCapabilities> {
        self.agents
            .get(agent_id)
            .map(|e| e.capabilities.clone())
            .ok_or_else(|| QuorumError::AgentNotFound(format!("remote agent '{}'", agent_id)))
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    /// Registered ids, sorted.
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> RemoteAgentConfig {
        RemoteAgentConfig {
            id: "weather".into(),
            name: "Weather".into(),
            description: "Forecasts".into(),
            endpoint: "http://localhost:9000/".into(),
            skills: vec!["forecast".into(), "alerts".into()],
        }
    }

    #[test]
    fn from_config_registers_agents_and_skills() {
        let registry = A2aRegistry::from_config(&[weather()]);
        assert!(registry.is_registered("weather"));
        assert_eq!(registry.endpoint("weather").unwrap(), "http://localhost:9000");

        let caps = registry.capabilities("weather").unwrap();
        assert!(caps.has_skill("alerts"));
        assert_eq!(caps.description, "Forecasts");
    }

    #[test]
    fn unknown_agent_lookups_fail() {
        let registry = A2aRegistry::new();
        assert!(matches!(registry.endpoint("ghost"), Err(QuorumError::AgentNotFound(_))));
        assert!(registry.capabilities("ghost").is_err());
        assert!(!registry.unregister("ghost"));
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = A2aRegistry::from_config(&[weather()]);
        assert_eq!(registry.all_ids(), vec!["weather"]);
        assert!(registry.unregister("weather"));
        assert!(registry.all_ids().is_empty());
    }
}
