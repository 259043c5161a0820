use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a remote agent says it can do, as served at
/// `/.well-known/agent.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub agent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<SkillDescriptor>,
    #[serde(default)]
    pub features: AgentFeatures,
}

impl AgentCapabilities {
    pub fn has_skill(&self, skill_id: &str) -> bool {
        self.skills.iter().any(|s| s.id == skill_id)
    }

    pub fn skill(&self, skill_id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.id == skill_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parameter name to description.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SkillDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFeatures {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default)]
    pub state_tracking: bool,
    #[serde(default)]
    pub async_invocation: bool,
}
