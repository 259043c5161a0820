use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use quorum_core::config::{AgentProfileConfig, AppConfig, ModelConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::event::EventBus;
use quorum_core::traits::LlmClient;
use quorum_core::types::SessionId;
use quorum_tools::builtin::TERMINATE_TOOL;
use quorum_tools::ToolRegistry;

use crate::agent::{AgentSettings, ReasoningAgent};
use crate::prompt::{
    PromptLoader, DEFAULT_ANALYSIS_PROMPT, DEFAULT_SEARCH_PROMPT, DEFAULT_SUMMARY_AGENT_PROMPT,
};
use crate::registry::AgentRegistry;

/// What a specialized agent is: a prompt and a tool set.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub kind: String,
    pub description: String,
    /// Literal prompt or `file:` spec. `{agent_id}` is substituted.
    pub prompt: String,
    pub tools: Vec<String>,
    pub max_steps: Option<usize>,
}

impl AgentProfile {
    pub fn new(kind: &str, description: &str, prompt: &str, tools: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            description: description.to_string(),
            prompt: prompt.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            max_steps: None,
        }
    }
}

impl From<&AgentProfileConfig> for AgentProfile {
    fn from(config: &AgentProfileConfig) -> Self {
        let mut tools = config.tools.clone();
        if !tools.iter().any(|t| t == TERMINATE_TOOL) {
            tools.push(TERMINATE_TOOL.to_string());
        }
        Self {
            kind: config.kind.clone(),
            description: config.description.clone(),
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| format!("You are a {} agent (agent ID: {{agent_id}}).", config.kind)),
            tools,
            max_steps: config.max_steps,
        }
    }
}

/// Builds fresh reasoning agents from profiles.
pub struct AgentFactory {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    tools: ToolRegistry,
    registry: Arc<AgentRegistry>,
    settings: AgentSettings,
    prompts: Arc<PromptLoader>,
    profiles: HashMap<String, AgentProfile>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentFactory {
    /// A factory with the built-in `search`, `analysis`, and `summary`
    /// profiles, overridden or extended by `[[agents]]`.
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        registry: Arc<AgentRegistry>,
        prompts: Arc<PromptLoader>,
    ) -> Self {
        let defaults = [
            AgentProfile::new(
                "search",
                "Looks up information on the web",
                config.prompts.search.as_deref().unwrap_or(DEFAULT_SEARCH_PROMPT),
                &["web_search", TERMINATE_TOOL],
            ),
            AgentProfile::new(
                "analysis",
                "Analyzes data and produces statistics",
                config.prompts.analysis.as_deref().unwrap_or(DEFAULT_ANALYSIS_PROMPT),
                &["analyze_data", "statistics_report", TERMINATE_TOOL],
            ),
            AgentProfile::new(
                "summary",
                "Condenses material into summaries and key points",
                DEFAULT_SUMMARY_AGENT_PROMPT,
                &["summarize_text", "extract_key_points", TERMINATE_TOOL],
            ),
        ];

        let mut profiles: HashMap<String, AgentProfile> = defaults
            .into_iter()
            .map(|p| (p.kind.clone(), p))
            .collect();
        for extra in &config.agents {
            if profiles.contains_key(&extra.kind) {
                info!(kind = %extra.kind, "Overriding built-in agent profile");
            }
            profiles.insert(extra.kind.clone(), AgentProfile::from(extra));
        }

        Self {
            llm,
            model: config.model.clone(),
            tools,
            registry,
            settings: AgentSettings::from_config(config),
            prompts,
            profiles,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profiles.insert(profile.kind.clone(), profile);
        self
    }

    pub fn profile(&self, kind: &str) -> Option<&AgentProfile> {
        self.profiles.get(kind)
    }

    /// Known agent kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        kinds.sort();
        kinds
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Build an uninitialized agent of `kind` for `session_id`.
    pub fn create(&self, kind: &str, session_id: &SessionId) -> Result<ReasoningAgent> {
        let profile = self
            .profiles
            .get(kind)
            .ok_or_else(|| QuorumError::AgentNotFound(format!("no profile for agent kind '{}'", kind)))?;

        let tools = self.tools.subset(&profile.tools);
        if tools.len() < profile.tools.len() {
            warn!(kind, wanted = ?profile.tools, "Some profile tools are not registered");
        }

        let settings = AgentSettings {
            max_steps: profile.max_steps.unwrap_or(self.settings.max_steps),
            ..self.settings.clone()
        };

        let agent = ReasoningAgent::new(
            kind,
            kind,
            Arc::clone(&self.llm),
            self.model.clone(),
            Arc::new(tools),
            Arc::clone(&self.registry),
        )
        .with_settings(&settings)
        .with_description(profile.description.clone())
        .with_session(session_id.clone());

        let prompt = self.prompts.render(&profile.prompt, &[("agent_id", agent.id())])?;
        let mut agent = agent.with_system_prompt(prompt);
        if let Some(bus) = &self.event_bus {
            agent = agent.with_event_bus(Arc::clone(bus));
        }

        debug!(agent_id = %agent.id(), kind, session_id = %session_id, "Created agent");
        Ok(agent)
    }
}
