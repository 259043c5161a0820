use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuorumError, Result};

/// Top-level Quorum configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Extra or overriding agent profiles, keyed by `kind`.
    #[serde(default)]
    pub agents: Vec<AgentProfileConfig>,
    #[serde(default)]
    pub remote_agents: Vec<RemoteAgentConfig>,
    #[serde(default)]
    pub web_search: Option<WebSearchConfig>,
}

/// Reasoning-loop settings shared by all tool-calling agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// How many earlier identical assistant replies count as being stuck.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: usize,
    /// Standing instruction appended as a user turn before each think step.
    #[serde(default)]
    pub next_step_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            duplicate_threshold: default_duplicate_threshold(),
            next_step_prompt: None,
        }
    }
}

fn default_max_steps() -> usize { 30 }
fn default_duplicate_threshold() -> usize { 2 }

/// Token budget for each agent's memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_max_tokens")]
    pub max_tokens: usize,
    /// Headroom kept free below `max_tokens` when truncating.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_memory_max_tokens(),
            safety_margin: default_safety_margin(),
        }
    }
}

fn default_memory_max_tokens() -> usize { 30_000 }
fn default_safety_margin() -> usize { 2_000 }

/// Workflow engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Engine-level cap on streamed node executions per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Graph-level hard stop, reported as `MaxIterations`.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    /// History entries longer than this are cut when handed to agents.
    #[serde(default = "default_history_preview_chars")]
    pub history_preview_chars: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            recursion_limit: default_recursion_limit(),
            history_preview_chars: default_history_preview_chars(),
        }
    }
}

fn default_max_iterations() -> usize { 25 }
fn default_recursion_limit() -> usize { 100 }
fn default_history_preview_chars() -> usize { 100 }

/// Prompt sources. Each value is literal text or `file:<path>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Base directory for relative `file:` prompts.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub coordinator: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub analysis: Option<String>,
}

/// A specialized agent described by data rather than code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfileConfig {
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

/// A remote agent reachable over A2A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    pub api_key: String,
}

fn default_search_endpoint() -> String { "https://api.tavily.com/search".to_string() }

impl AppConfig {
    /// Configuration with the given model and every other section defaulted.
    pub fn with_model(model: ModelConfig) -> Self {
        Self {
            model,
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            workflow: WorkflowConfig::default(),
            prompts: PromptsConfig::default(),
            agents: Vec::new(),
            remote_agents: Vec::new(),
            web_search: None,
        }
    }

    /// Load config from a TOML file, expanding `${ENV_VAR}` references first.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| QuorumError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| QuorumError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_QUORUM_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_QUORUM_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_QUORUM_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_QUORUM_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_QUORUM_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.agent.max_steps, 30);
        assert_eq!(config.agent.duplicate_threshold, 2);
        assert_eq!(config.memory.max_tokens, 30_000);
        assert_eq!(config.memory.safety_margin, 2_000);
        assert_eq!(config.workflow.max_iterations, 25);
        assert!(config.remote_agents.is_empty());
        assert!(config.web_search.is_none());
    }

    #[test]
    fn test_remote_agents_and_profiles() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"

[[agents]]
kind = "translation"
description = "Translates text"
tools = ["terminate"]

[[remote_agents]]
id = "weather"
endpoint = "http://localhost:9000"
skills = ["forecast", "alerts"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agents[0].kind, "translation");
        assert!(config.agents[0].max_steps.is_none());
        assert_eq!(config.remote_agents[0].skills, vec!["forecast", "alerts"]);
        assert_eq!(config.remote_agents[0].name, "");
    }
}
