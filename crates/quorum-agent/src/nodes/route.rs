use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::graph::{SessionState, END};

use super::{ANALYSIS_NODE, COORDINATOR_NODE, HUMAN_INPUT_NODE, SEARCH_NODE, SUMMARY_NODE};

/// What the coordinator asked for next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Search,
    Analysis,
    Summary,
    HumanInput,
    Finish,
    /// A remote agent node, by node name.
    Remote(String),
}

impl NextAction {
    /// Value stored under `next` in the session state.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Search => "search",
            Self::Analysis => "analysis",
            Self::Summary => "summary",
            Self::HumanInput => "human_input",
            Self::Finish => "FINISH",
            Self::Remote(node) => node,
        }
    }

    /// Normalize an `action` value. Unrecognized values mean `Finish`.
    pub fn from_action(value: &str, remote_nodes: &[String]) -> Self {
        let trimmed = value.trim();
        if let Some(node) = remote_nodes.iter().find(|n| n.as_str() == trimmed) {
            return Self::Remote(node.clone());
        }

        let normalized = trimmed.to_lowercase();
        match normalized.as_str() {
            "search" => return Self::Search,
            "analysis" => return Self::Analysis,
            "summary" => return Self::Summary,
            "human_input" => return Self::HumanInput,
            "finish" => return Self::Finish,
            _ => {}
        }

        if normalized.contains("搜索") {
            Self::Search
        } else if normalized.contains("分析") {
            Self::Analysis
        } else if normalized.contains("总结") {
            Self::Summary
        } else if normalized.contains("用户输入") {
            Self::HumanInput
        } else {
            Self::Finish
        }
    }

    /// Parse a free-form coordinator reply.
    ///
    /// Reads `action` from the outermost `{...}` span if it is valid JSON,
    /// then falls back to a `search:`-style prefix, then to `Summary`.
    pub fn parse(reply: &str, remote_nodes: &[String]) -> Self {
        static JSON_SPAN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = JSON_SPAN.get_or_init(|| Regex::new(r"\{[\s\S]*\}").ok());

        let trimmed = reply.trim();
        if let Some(span) = pattern.as_ref().and_then(|re| re.find(trimmed)) {
            match serde_json::from_str::<serde_json::Value>(span.as_str()) {
                Ok(value) => {
                    if let Some(action) = value.get("action") {
                        let action = action
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| action.to_string());
                        return Self::from_action(&action, remote_nodes);
                    }
                }
                Err(e) => debug!(error = %e, "Coordinator reply is not valid JSON, scanning prefixes"),
            }
        }

        let lower = trimmed.to_lowercase();
        let prefixes: [(&[&str], Self); 4] = [
            (&["search:", "搜索："][..], Self::Search),
            (&["analysis:", "分析："][..], Self::Analysis),
            (&["summary:", "总结："][..], Self::Summary),
            (&["human_input:", "用户输入："][..], Self::HumanInput),
        ];
        for (markers, action) in prefixes {
            if markers.iter().any(|m| lower.starts_with(m)) {
                return action;
            }
        }

        Self::Summary
    }
}

/// Coordinator routing: `finished` ends the run, known actions map to
/// their nodes, and anything else is left for the edge fallback.
pub fn route_from_coordinator(state: &SessionState, remote_nodes: &[String]) -> String {
    if state.is_finished() {
        return END.to_string();
    }

    let next = state.next().unwrap_or(COORDINATOR_NODE);
    if remote_nodes.iter().any(|n| n == next) {
        return next.to_string();
    }

    match next {
        "search" => SEARCH_NODE.to_string(),
        "analysis" => ANALYSIS_NODE.to_string(),
        "summary" | "FINISH" => SUMMARY_NODE.to_string(),
        "human_input" => HUMAN_INPUT_NODE.to_string(),
        other => {
            warn!(next = %other, "Coordinator chose an unknown action");
            other.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateSchema, StateUpdate};

    fn remote() -> Vec<String> {
        vec!["weather_forecast".to_string()]
    }

    #[test]
    fn parses_json_action() {
        let reply = "I think we should look this up.\n{\"action\": \"search\", \"reason\": \"need facts\"}";
        assert_eq!(NextAction::parse(reply, &[]), NextAction::Search);
        assert_eq!(
            NextAction::parse(r#"{"action": "ANALYSIS"}"#, &[]),
            NextAction::Analysis
        );
        assert_eq!(
            NextAction::parse(r#"{"action": "FINISH"}"#, &[]),
            NextAction::Finish
        );
    }

    #[test]
    fn unknown_json_action_means_finish() {
        assert_eq!(
            NextAction::parse(r#"{"action": "dance"}"#, &[]),
            NextAction::Finish
        );
    }

    #[test]
    fn chinese_keywords_are_understood() {
        assert_eq!(NextAction::parse(r#"{"action": "搜索"}"#, &[]), NextAction::Search);
        assert_eq!(NextAction::parse(r#"{"action": "完成"}"#, &[]), NextAction::Finish);
        assert_eq!(NextAction::parse("总结：可以回答了", &[]), NextAction::Summary);
    }

    #[test]
    fn prefix_fallback_and_default() {
        assert_eq!(NextAction::parse("analysis: crunch numbers", &[]), NextAction::Analysis);
        assert_eq!(NextAction::parse("  Human_Input: ask", &[]), NextAction::HumanInput);
        assert_eq!(NextAction::parse("no idea", &[]), NextAction::Summary);
        assert_eq!(NextAction::parse("{not json", &[]), NextAction::Summary);
    }

    #[test]
    fn remote_node_names_pass_through() {
        let action = NextAction::parse(r#"{"action": "weather_forecast"}"#, &remote());
        assert_eq!(action, NextAction::Remote("weather_forecast".into()));
        assert_eq!(action.as_str(), "weather_forecast");
    }

    fn state(next: Option<&str>, finished: bool) -> SessionState {
        let mut update = StateUpdate::new().finished(finished);
        if let Some(next) = next {
            update = update.next(next);
        }
        let mut state = SessionState::new();
        state.apply(&StateSchema::session(), update).unwrap();
        state
    }

    #[test]
    fn router_maps_actions_to_nodes() {
        assert_eq!(route_from_coordinator(&state(Some("search"), false), &[]), SEARCH_NODE);
        assert_eq!(route_from_coordinator(&state(Some("analysis"), false), &[]), ANALYSIS_NODE);
        assert_eq!(route_from_coordinator(&state(Some("FINISH"), false), &[]), SUMMARY_NODE);
        assert_eq!(route_from_coordinator(&state(Some("human_input"), false), &[]), HUMAN_INPUT_NODE);
        assert_eq!(
            route_from_coordinator(&state(Some("weather_forecast"), false), &remote()),
            "weather_forecast"
        );
    }

    #[test]
    fn router_ends_finished_runs() {
        assert_eq!(route_from_coordinator(&state(Some("search"), true), &[]), END);
    }
}
