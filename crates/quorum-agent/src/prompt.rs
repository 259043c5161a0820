use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error};

use quorum_core::config::PromptsConfig;
use quorum_core::error::{QuorumError, Result};

pub const DEFAULT_COORDINATOR_PROMPT: &str = r#"You are the coordinator of a team of agents. Read the user's request and everything gathered so far, then decide the next action.

Available actions:
- search: information must be looked up
- analysis: gathered data needs analysis
- summary: enough is known to answer the user
- human_input: the request is ambiguous and the user must clarify
- FINISH: the task is complete

Reply with a JSON object such as {"action": "search", "reason": "..."}.
If a remote agent node is listed, you may use its node name as the action.
"#;

pub const DEFAULT_SUMMARY_PROMPT: &str = r#"You write the final reply to the user.

- Combine the user's question with every piece of gathered information.
- If nothing was gathered, answer the question directly.
- Reply in natural prose, never JSON.
- Lead with the key findings and conclusions.
"#;

pub const DEFAULT_SEARCH_PROMPT: &str = r#"You are a search agent (agent ID: {agent_id}).

Understand what the user needs, extract the key terms, and call web_search to gather relevant information. Organize the results clearly.
Once the search results answer the request, call terminate with status "success" and your agent ID.
"#;

pub const DEFAULT_ANALYSIS_PROMPT: &str = r#"You are an analysis agent (agent ID: {agent_id}).

Analyze the information and data you are given with analyze_data and statistics_report. Identify patterns, trends, and insights, and state clear conclusions.
Once the analysis is complete, call terminate with status "success" and your agent ID.
"#;

pub const DEFAULT_SUMMARY_AGENT_PROMPT: &str = r#"You are a summarization agent (agent ID: {agent_id}).

Condense the material you are given with summarize_text and extract_key_points.
Once the summary is complete, call terminate with status "success" and your agent ID.
"#;

/// Resolves prompt specs to text.
///
/// A spec starting with `file:` is read from disk, relative to the
/// configured prompt directory unless absolute; files are cached after the
/// first read. Any other spec is literal text.
#[derive(Debug, Default)]
pub struct PromptLoader {
    base_dir: Option<PathBuf>,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl PromptLoader {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &PromptsConfig) -> Self {
        Self::new(config.dir.as_ref().map(PathBuf::from))
    }

    pub fn resolve(&self, spec: &str) -> Result<String> {
        let Some(path_str) = spec.strip_prefix("file:") else {
            return Ok(spec.to_string());
        };

        let path = Path::new(path_str.trim());
        let resolved = match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };

        if let Some(cached) = self.cache.lock().get(&resolved) {
            return Ok(cached.clone());
        }

        let content = std::fs::read_to_string(&resolved).map_err(|e| {
            error!(path = %resolved.display(), error = %e, "Failed to load prompt file");
            QuorumError::Config(format!("failed to load prompt file {}: {}", resolved.display(), e))
        })?;
        debug!(path = %resolved.display(), "Loaded prompt file");
        self.cache.lock().insert(resolved, content.clone());
        Ok(content)
    }

    /// Resolve `spec` and substitute every `{key}` placeholder.
    pub fn render(&self, spec: &str, replacements: &[(&str, &str)]) -> Result<String> {
        let mut content = self.resolve(spec)?;
        for (key, value) in replacements {
            content = content.replace(&format!("{{{}}}", key), value);
        }
        Ok(content)
    }

    /// Resolve `spec` if configured, else use `default`.
    pub fn resolve_or(&self, spec: Option<&str>, default: &str) -> Result<String> {
        match spec {
            Some(spec) => self.resolve(spec),
            None => Ok(default.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_spec_is_returned_as_is() {
        let loader = PromptLoader::default();
        assert_eq!(loader.resolve("You are a pirate.").unwrap(), "You are a pirate.");
    }

    #[test]
    fn file_spec_reads_relative_to_base_dir_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.txt");
        std::fs::write(&path, "Coordinate carefully.").unwrap();

        let loader = PromptLoader::new(Some(dir.path().to_path_buf()));
        assert_eq!(loader.resolve("file:coordinator.txt").unwrap(), "Coordinate carefully.");

        // Served from cache once the file is gone.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loader.resolve("file:coordinator.txt").unwrap(), "Coordinate carefully.");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let loader = PromptLoader::default();
        let err = loader.resolve("file:/nonexistent/quorum/prompt.txt").unwrap_err();
        assert!(matches!(err, QuorumError::Config(_)));
    }

    #[test]
    fn render_substitutes_placeholders() {
        let loader = PromptLoader::default();
        let text = loader
            .render(DEFAULT_SEARCH_PROMPT, &[("agent_id", "search_1234")])
            .unwrap();
        assert!(text.contains("agent ID: search_1234"));
        assert!(!text.contains("{agent_id}"));
    }

    #[test]
    fn resolve_or_falls_back_to_default() {
        let loader = PromptLoader::default();
        assert_eq!(loader.resolve_or(None, "default").unwrap(), "default");
        assert_eq!(loader.resolve_or(Some("custom"), "default").unwrap(), "custom");
    }
}
