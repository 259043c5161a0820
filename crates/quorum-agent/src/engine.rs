use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tracing::{error, info, warn};

use quorum_core::config::{AppConfig, WorkflowConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::event::EventBus;
use quorum_core::traits::LlmClient;
use quorum_core::types::{Message, Role, SessionId, WorkflowEvent};
use quorum_tools::ToolRegistry;

use crate::factory::AgentFactory;
use crate::graph::{
    CompiledGraph, Node, RunConfig, SessionState, StateGraph, StateSchema, StateUpdate, END,
};
use crate::nodes::{
    route_from_coordinator, AgentNode, CoordinatorNode, HumanInputNode, SummaryNode, ANALYSIS_NODE,
    COORDINATOR_NODE, HUMAN_INPUT_NODE, SEARCH_NODE, SUMMARY_NODE,
};
use crate::prompt::{PromptLoader, DEFAULT_COORDINATOR_PROMPT, DEFAULT_SUMMARY_PROMPT};
use crate::registry::AgentRegistry;
use crate::remote::{A2aClient, A2aRegistry, HttpA2aClient, RemoteAgentNode};

const APOLOGY: &str =
    "Sorry, the workflow could not produce an answer. Please try rephrasing your request.";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Completed(String),
    /// Stopped by the iteration cap; carries whatever results were gathered.
    ForcedTermination { partial: Option<String> },
}

impl WorkflowOutcome {
    /// The text shown to the caller.
    pub fn into_text(self) -> String {
        match self {
            Self::Completed(text) => text,
            Self::ForcedTermination {
                partial: Some(partial),
            } => format!(
                "The workflow detected a loop and was stopped early. Partial results so far:\n\n{}",
                partial
            ),
            Self::ForcedTermination { partial: None } => {
                format!("The workflow detected a loop and was stopped early. {}", APOLOGY)
            }
        }
    }
}

/// Transient state of one session's latest run.
#[derive(Debug, Clone)]
pub struct SessionRun {
    pub thread_id: String,
    pub iterations: usize,
    pub last_state: Option<SessionState>,
}

/// Builder for [`WorkflowEngine`].
pub struct EngineBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    tools: Option<ToolRegistry>,
    registry: Option<Arc<AgentRegistry>>,
    a2a_client: Option<Arc<dyn A2aClient>>,
    event_bus: Option<Arc<EventBus>>,
}

impl EngineBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn a2a_client(mut self, client: Arc<dyn A2aClient>) -> Self {
        self.a2a_client = Some(client);
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine> {
        let config = self.config;
        let prompts = Arc::new(PromptLoader::from_config(&config.prompts));
        let coordinator_prompt =
            prompts.resolve_or(config.prompts.coordinator.as_deref(), DEFAULT_COORDINATOR_PROMPT)?;
        let summary_prompt =
            prompts.resolve_or(config.prompts.summary.as_deref(), DEFAULT_SUMMARY_PROMPT)?;

        let tools = self
            .tools
            .unwrap_or_else(|| ToolRegistry::with_builtins(&config));
        let registry = self.registry.unwrap_or_default();
        let a2a_registry = Arc::new(A2aRegistry::from_config(&config.remote_agents));
        let a2a_client = self
            .a2a_client
            .unwrap_or_else(|| {
                Arc::new(HttpA2aClient::new(Arc::clone(&a2a_registry))) as Arc<dyn A2aClient>
            });

        let mut factory = AgentFactory::new(
            &config,
            Arc::clone(&self.llm),
            tools,
            Arc::clone(&registry),
            prompts,
        );
        if let Some(bus) = &self.event_bus {
            factory = factory.with_event_bus(Arc::clone(bus));
        }
        let factory = Arc::new(factory);

        let mut remote_nodes = Vec::new();
        let mut remote_descriptions = Vec::new();
        for agent in &config.remote_agents {
            for skill in &agent.skills {
                let node = RemoteAgentNode::new(Arc::clone(&a2a_client), &agent.id, skill);
                let label = if agent.name.is_empty() { &agent.id } else { &agent.name };
                remote_descriptions.push((
                    node.name().to_string(),
                    format!("{} ({}), skill '{}'", label, agent.description, skill),
                ));
                remote_nodes.push(node);
            }
        }
        let remote_names: Vec<String> = remote_descriptions.iter().map(|(n, _)| n.clone()).collect();
        if !remote_names.is_empty() {
            info!(nodes = ?remote_names, "Remote agent nodes added");
        }

        let preview = config.workflow.history_preview_chars;
        let mut graph = StateGraph::new(StateSchema::session())
            .add_node(
                CoordinatorNode::new(Arc::clone(&self.llm), config.model.clone(), coordinator_prompt)
                    .with_remote_nodes(remote_descriptions),
            )
            .add_node(AgentNode::new(SEARCH_NODE, "search", Arc::clone(&factory)).with_history_preview(preview))
            .add_node(AgentNode::new(ANALYSIS_NODE, "analysis", Arc::clone(&factory)).with_history_preview(preview))
            .add_node(SummaryNode::new(Arc::clone(&self.llm), config.model.clone(), summary_prompt))
            .add_node(HumanInputNode);

        let mut targets: Vec<String> = [SEARCH_NODE, ANALYSIS_NODE, SUMMARY_NODE, HUMAN_INPUT_NODE, END]
            .iter()
            .map(|t| t.to_string())
            .collect();
        targets.extend(remote_names.iter().cloned());

        for node in remote_nodes {
            let name = node.name().to_string();
            graph = graph.add_node(node).add_edge(name, COORDINATOR_NODE);
        }

        let router_names = remote_names.clone();
        let graph = graph
            .set_entry_point(COORDINATOR_NODE)
            .add_conditional_edges(
                COORDINATOR_NODE,
                move |state: &SessionState| route_from_coordinator(state, &router_names),
                targets,
                SUMMARY_NODE,
            )
            .add_edge(SEARCH_NODE, COORDINATOR_NODE)
            .add_edge(ANALYSIS_NODE, COORDINATOR_NODE)
            .add_edge(SUMMARY_NODE, COORDINATOR_NODE)
            .add_edge(HUMAN_INPUT_NODE, COORDINATOR_NODE)
            .compile()?;

        info!(nodes = ?graph.node_names(), "Workflow engine ready");
        Ok(WorkflowEngine {
            graph,
            workflow: config.workflow.clone(),
            factory,
            registry,
            a2a_registry,
            event_bus: self.event_bus,
            sessions: DashMap::new(),
            locks: DashMap::new(),
        })
    }
}

/// Runs the multi-agent workflow graph, one run per request.
pub struct WorkflowEngine {
    graph: CompiledGraph,
    workflow: WorkflowConfig,
    factory: Arc<AgentFactory>,
    registry: Arc<AgentRegistry>,
    a2a_registry: Arc<A2aRegistry>,
    event_bus: Option<Arc<EventBus>>,
    sessions: DashMap<SessionId, SessionRun>,
    locks: DashMap<SessionId, Arc<tokio::sync::Mutex<()>>>,
}

impl WorkflowEngine {
    pub fn builder(config: &AppConfig, llm: Arc<dyn LlmClient>) -> EngineBuilder {
        EngineBuilder {
            config: config.clone(),
            llm,
            tools: None,
            registry: None,
            a2a_client: None,
            event_bus: None,
        }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn a2a_registry(&self) -> &Arc<A2aRegistry> {
        &self.a2a_registry
    }

    /// Transient state of the session's latest run, if not cleaned up.
    pub fn session_run(&self, session_id: &SessionId) -> Option<SessionRun> {
        self.sessions.get(session_id).map(|run| run.clone())
    }

    /// Run the workflow and return the text for the caller. Never fails:
    /// faults are reported as text.
    pub async fn execute_workflow(
        &self,
        input: &str,
        session_id: &SessionId,
        history: &[Message],
    ) -> String {
        match self.run_workflow(input, session_id, history).await {
            Ok(outcome) => outcome.into_text(),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Workflow failed");
                self.publish(WorkflowEvent::RunError {
                    session_id: session_id.clone(),
                    error: e.to_string(),
                });
                format!("The workflow failed while processing your request: {}", e)
            }
        }
    }

    /// Run the workflow to an explicit outcome.
    ///
    /// Runs for the same session are serialized; each starts from empty
    /// transient state.
    pub async fn run_workflow(
        &self,
        input: &str,
        session_id: &SessionId,
        history: &[Message],
    ) -> Result<WorkflowOutcome> {
        let lock = self
            .locks
            .entry(session_id.clone())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().await;

        self.cleanup_session(session_id);
        let thread_id = format!("{}_agent_{}", session_id, chrono::Utc::now().timestamp_millis());
        self.sessions.insert(
            session_id.clone(),
            SessionRun {
                thread_id: thread_id.clone(),
                iterations: 0,
                last_state: None,
            },
        );

        info!(session_id = %session_id, thread_id = %thread_id, history = history.len(), "Workflow started");
        self.publish(WorkflowEvent::RunStarted {
            session_id: session_id.clone(),
            thread_id: thread_id.clone(),
        });

        let initial = self.initial_state(input, history)?;
        let run_config = RunConfig::new(session_id.clone(), thread_id.clone())
            .with_recursion_limit(self.workflow.recursion_limit);

        let mut steps = self.graph.stream(initial, run_config);
        let mut iterations = 0;
        let mut partials: Vec<String> = Vec::new();
        let mut last_state = None;
        let mut hit_cap = false;

        while let Some(step) = steps.next().await {
            let step = match step {
                Ok(step) => step,
                Err(QuorumError::MaxIterations(n)) => {
                    warn!(session_id = %session_id, steps = n, "Graph recursion limit hit");
                    hit_cap = true;
                    break;
                }
                Err(e) => {
                    self.record(session_id, iterations, last_state);
                    return Err(e);
                }
            };

            iterations += 1;
            info!(session_id = %session_id, node = %step.node, iteration = iterations, "Node completed");
            self.publish(WorkflowEvent::NodeCompleted {
                thread_id: thread_id.clone(),
                node: step.node.clone(),
                iteration: iterations,
            });

            if let Some(result) = step.state.result() {
                if partials.last().map(String::as_str) != Some(result) {
                    partials.push(result.to_string());
                }
            }

            let finished = step.state.is_finished();
            last_state = Some(step.state);
            if finished {
                break;
            }
            if iterations >= self.workflow.max_iterations {
                hit_cap = true;
                break;
            }
        }
        drop(steps);

        let outcome = if hit_cap {
            warn!(session_id = %session_id, iterations, "Forced termination");
            self.publish(WorkflowEvent::ForcedTermination {
                session_id: session_id.clone(),
                iterations,
            });
            WorkflowOutcome::ForcedTermination {
                partial: (!partials.is_empty()).then(|| partials.join("\n")),
            }
        } else {
            info!(session_id = %session_id, iterations, "Workflow completed");
            self.publish(WorkflowEvent::RunCompleted {
                session_id: session_id.clone(),
                iterations,
            });
            WorkflowOutcome::Completed(final_text(last_state.as_ref()))
        };

        self.record(session_id, iterations, last_state);
        Ok(outcome)
    }

    /// Discard transient run state for `session_id`. Idempotent.
    ///
    /// The session's lock goes too unless a run holds or awaits it.
    pub fn cleanup_session(&self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            info!(session_id = %session_id, "Cleaned up workflow session");
        }
        self.locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Sessions the engine still keeps run state or a lock for.
    pub fn tracked_sessions(&self) -> usize {
        let mut ids: HashSet<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.extend(self.locks.iter().map(|e| e.key().clone()));
        ids.len()
    }

    fn initial_state(&self, input: &str, history: &[Message]) -> Result<SessionState> {
        let mut messages = history.to_vec();
        messages.push(Message::user(input));

        let mut state = SessionState::new();
        state.apply(
            self.graph.schema(),
            StateUpdate::new()
                .user_input(input)
                .session_history(history.to_vec())
                .messages(messages)
                .next(COORDINATOR_NODE)
                .current_agent("start")
                .finished(false)
                .has_history(!history.is_empty()),
        )?;
        Ok(state)
    }

    fn record(&self, session_id: &SessionId, iterations: usize, last_state: Option<SessionState>) {
        if let Some(mut run) = self.sessions.get_mut(session_id) {
            run.iterations = iterations;
            run.last_state = last_state;
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Result text, else the node error, else the last assistant message.
fn final_text(state: Option<&SessionState>) -> String {
    let Some(state) = state else {
        return APOLOGY.to_string();
    };
    if let Some(result) = state.result() {
        return result.to_string();
    }
    if let Some(error) = state.error() {
        return format!("The workflow could not complete: {}", error);
    }
    state
        .messages()
        .iter()
        .rev()
        .find(|m| m.role() == Role::Assistant && !m.content().is_empty())
        .map(|m| m.content().to_string())
        .unwrap_or_else(|| APOLOGY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_test_utils::{test_config, ScriptedLlm};

    #[test]
    fn forced_termination_text() {
        let with = WorkflowOutcome::ForcedTermination {
            partial: Some("half an answer".into()),
        }
        .into_text();
        assert!(with.contains("stopped early"));
        assert!(with.ends_with("half an answer"));

        let without = WorkflowOutcome::ForcedTermination { partial: None }.into_text();
        assert!(without.contains("rephrasing"));
    }

    #[test]
    fn final_text_prefers_result_then_error() {
        let schema = StateSchema::session();
        let mut state = SessionState::new();
        state
            .apply(&schema, StateUpdate::new().message(Message::assistant("last words")))
            .unwrap();
        assert_eq!(final_text(Some(&state)), "last words");

        state.apply(&schema, StateUpdate::new().error("boom")).unwrap();
        assert!(final_text(Some(&state)).ends_with("boom"));

        state.apply(&schema, StateUpdate::new().result("answer")).unwrap();
        assert_eq!(final_text(Some(&state)), "answer");
        assert_eq!(final_text(None), APOLOGY);
    }

    #[test]
    fn graph_has_remote_nodes_from_config() {
        let mut config = test_config();
        config.remote_agents.push(quorum_core::config::RemoteAgentConfig {
            id: "weather".into(),
            name: String::new(),
            description: "forecasts".into(),
            endpoint: "http://127.0.0.1:1".into(),
            skills: vec!["forecast".into()],
        });
        let engine = WorkflowEngine::builder(&config, Arc::new(ScriptedLlm::new()))
            .build()
            .unwrap();

        assert_eq!(
            engine.graph().node_names(),
            vec!["analysis_agent", "coordinator", "human_input", "search_agent", "summary", "weather_forecast"]
        );
        assert!(engine.a2a_registry().is_registered("weather"));
    }

    #[tokio::test]
    async fn cleanup_releases_session_locks() {
        let llm = ScriptedLlm::new().repeating(r#"{"action": "summary"}"#);
        let engine = WorkflowEngine::builder(&test_config(), Arc::new(llm))
            .build()
            .unwrap();

        let ids: Vec<SessionId> = (0..50).map(|i| SessionId::from(format!("s{}", i))).collect();
        for id in &ids {
            engine.execute_workflow("hi", id, &[]).await;
        }
        assert_eq!(engine.tracked_sessions(), 50);
        assert_eq!(engine.locks.len(), 50);

        for id in &ids {
            engine.cleanup_session(id);
        }
        assert_eq!(engine.tracked_sessions(), 0);
        assert!(engine.locks.is_empty());
    }

    #[tokio::test]
    async fn cleanup_keeps_a_lock_in_use() {
        let engine = WorkflowEngine::builder(&test_config(), Arc::new(ScriptedLlm::new()))
            .build()
            .unwrap();
        let sid = SessionId::from("busy");
        let held = engine.locks.entry(sid.clone()).or_default().value().clone();
        let guard = held.lock().await;

        engine.cleanup_session(&sid);
        assert!(engine.locks.contains_key(&sid));

        drop(guard);
        drop(held);
        engine.cleanup_session(&sid);
        assert!(!engine.locks.contains_key(&sid));
    }

    #[tokio::test]
    async fn initial_state_embeds_history() {
        let engine = WorkflowEngine::builder(&test_config(), Arc::new(ScriptedLlm::new()))
            .build()
            .unwrap();
        let history = vec![Message::user("earlier"), Message::assistant("reply")];
        let state = engine.initial_state("now", &history).unwrap();

        assert_eq!(state.user_input(), "now");
        assert!(state.has_history());
        assert_eq!(state.session_history().len(), 2);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.current_agent(), Some("start"));
        assert!(!state.is_finished());
    }
}
