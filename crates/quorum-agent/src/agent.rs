use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use quorum_core::config::{AgentConfig, AppConfig, MemoryConfig, ModelConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::event::EventBus;
use quorum_core::traits::{LlmClient, ToolCaller};
use quorum_core::types::*;
use quorum_memory::Memory;
use quorum_tools::builtin::TERMINATE_TOOL;

use crate::guardian::{is_stuck, with_stuck_prompt};
use crate::registry::AgentRegistry;

/// Asked after a tool batch so the model turns raw output into prose.
const FOLLOW_UP_PROMPT: &str =
    "Based on the tool results above, explain to the user conversationally what you found.";

const NO_ACTION: &str = "Thinking complete - no action needed";

/// Loop limits and standing prompts for one agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub duplicate_threshold: usize,
    pub next_step_prompt: Option<String>,
    pub memory: MemoryConfig,
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.agent.max_steps,
            duplicate_threshold: config.agent.duplicate_threshold,
            next_step_prompt: config.agent.next_step_prompt.clone(),
            memory: config.memory.clone(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            max_steps: agent.max_steps,
            duplicate_threshold: agent.duplicate_threshold,
            next_step_prompt: agent.next_step_prompt,
            memory: MemoryConfig::default(),
        }
    }
}

/// The think/act capability of a reasoning agent.
pub trait Stepper: Send + Sync {
    /// One model call. Returns true when tools were requested.
    fn think(&self) -> BoxFuture<'_, Result<bool>>;

    /// Execute the tools requested by the last `think`.
    fn act(&self) -> BoxFuture<'_, Result<String>>;

    /// Step result when `think` requested nothing.
    fn idle_result(&self) -> String {
        NO_ACTION.to_string()
    }

    fn step(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if self.think().await? {
                self.act().await
            } else {
                Ok(self.idle_result())
            }
        })
    }
}

struct AgentInner {
    state: AgentState,
    current_step: usize,
    memory: Memory,
    system_prompt: String,
    next_step_prompt: Option<String>,
    initialized: bool,
    pending_calls: Vec<ToolCall>,
    last_reply: String,
}

/// A tool-calling ReAct agent.
///
/// Specialization is data: a system prompt plus the tools it may call.
/// Mutable state sits behind a short-lived lock that is never held across
/// a model or tool call, so tools can reach back into the agent (e.g.
/// `terminate`) while it is acting.
pub struct ReasoningAgent {
    id: String,
    name: String,
    kind: String,
    description: String,
    session_id: SessionId,
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    tools: Arc<dyn ToolCaller>,
    registry: Arc<AgentRegistry>,
    event_bus: Option<Arc<EventBus>>,
    max_steps: usize,
    duplicate_threshold: usize,
    inner: Mutex<AgentInner>,
}

impl ReasoningAgent {
    pub fn new(
        name: &str,
        kind: &str,
        llm: Arc<dyn LlmClient>,
        model: ModelConfig,
        tools: Arc<dyn ToolCaller>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let settings = AgentSettings::default();
        Self {
            id: format!("{}_{}", name, &suffix[..8]),
            name: name.to_string(),
            kind: kind.to_string(),
            description: String::new(),
            session_id: SessionId::new(),
            llm,
            model,
            tools,
            registry,
            event_bus: None,
            max_steps: settings.max_steps,
            duplicate_threshold: settings.duplicate_threshold,
            inner: Mutex::new(AgentInner {
                state: AgentState::Idle,
                current_step: 0,
                memory: Memory::from_config(&settings.memory),
                system_prompt: String::new(),
                next_step_prompt: settings.next_step_prompt,
                initialized: false,
                pending_calls: Vec::new(),
                last_reply: String::new(),
            }),
        }
    }

    pub fn with_settings(mut self, settings: &AgentSettings) -> Self {
        self.max_steps = settings.max_steps;
        self.duplicate_threshold = settings.duplicate_threshold;
        let inner = self.inner.get_mut();
        inner.next_step_prompt = settings.next_step_prompt.clone();
        inner.memory = Memory::from_config(&settings.memory);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.get_mut().system_prompt = prompt.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().state
    }

    pub fn current_step(&self) -> usize {
        self.inner.lock().current_step
    }

    pub fn system_prompt(&self) -> String {
        self.inner.lock().system_prompt.clone()
    }

    pub fn next_step_prompt(&self) -> Option<String> {
        self.inner.lock().next_step_prompt.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    /// Snapshot of the agent's memory.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().memory.messages().to_vec()
    }

    pub fn add_message(&self, message: Message) {
        self.inner.lock().memory.add_message(message);
    }

    pub(crate) fn set_state(&self, state: AgentState) {
        self.inner.lock().state = state;
    }

    /// Finalize the system prompt and register with the registry.
    ///
    /// Must run exactly once before `run`.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.initialized {
                return Err(QuorumError::AgentAlreadyInitialized(self.id.clone()));
            }
            let prompt = format!(
                "{}\n\n# META INFO\nYour agent ID is: {}\n\
                 When calling the terminate tool, always include your agent ID.",
                inner.system_prompt, self.id
            );
            inner.memory.add_message(Message::system(prompt.clone()));
            inner.system_prompt = prompt;
            inner.initialized = true;
        }
        self.registry.register(Arc::clone(self));
        debug!(agent_id = %self.id, "Agent initialized");
        Ok(())
    }

    /// Run the reasoning loop on `request` until the agent finishes or the
    /// step budget runs out. Returns the per-step log.
    pub async fn run(self: &Arc<Self>, request: &str) -> Result<String> {
        let scope = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return Err(QuorumError::AgentNotInitialized(self.id.clone()));
            }
            match inner.state {
                AgentState::Idle => {}
                AgentState::Finished => inner.current_step = 0,
                state => {
                    return Err(QuorumError::InvalidAgentState {
                        agent: self.id.clone(),
                        state,
                    })
                }
            }
            // Check and transition under one lock.
            inner.state = AgentState::Running;
            StateScope::entered(self, AgentState::Idle)
        };

        if !request.is_empty() {
            self.add_message(Message::user(request));
        }
        self.registry.mark_active(&self.id);
        info!(agent_id = %self.id, max_steps = self.max_steps, "Agent run started");

        scope.close(self.run_loop().await)
    }

    async fn run_loop(&self) -> Result<String> {
        let mut results = Vec::new();

        loop {
            let step = {
                let mut inner = self.inner.lock();
                if inner.current_step >= self.max_steps || inner.state == AgentState::Finished {
                    break;
                }
                inner.current_step += 1;
                inner.current_step
            };
            debug!(agent_id = %self.id, step, max_steps = self.max_steps, "Executing step");

            let result = self.step().await?;
            if self.is_stuck() {
                self.handle_stuck_state();
            }
            results.push(format!("Step {}: {}", step, result));
        }

        {
            let mut inner = self.inner.lock();
            if inner.current_step >= self.max_steps && inner.state != AgentState::Finished {
                inner.current_step = 0;
                inner.state = AgentState::Idle;
                results.push(format!("Terminated: Reached max steps ({})", self.max_steps));
                warn!(agent_id = %self.id, max_steps = self.max_steps, "Agent reached max steps");
            }
        }

        info!(agent_id = %self.id, steps = results.len(), state = %self.state(), "Agent run finished");
        Ok(if results.is_empty() {
            "No steps executed".to_string()
        } else {
            results.join("\n")
        })
    }

    fn is_stuck(&self) -> bool {
        let inner = self.inner.lock();
        is_stuck(inner.memory.messages(), self.duplicate_threshold)
    }

    fn handle_stuck_state(&self) {
        warn!(agent_id = %self.id, "Agent detected stuck state, adding corrective prompt");
        let mut inner = self.inner.lock();
        let prompt = with_stuck_prompt(inner.next_step_prompt.as_deref());
        inner.next_step_prompt = Some(prompt);
    }

    /// Store a model reply in memory and remember its tool calls.
    ///
    /// Calls without an id get one, since every tool reply must name its call.
    fn record_reply(&self, response: &ChatResponse) {
        let calls: Vec<ToolCall> = response
            .tool_calls
            .iter()
            .cloned()
            .map(|mut call| {
                if call.id.trim().is_empty() {
                    call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    warn!(agent_id = %self.id, tool = %call.name, call_id = %call.id, "Tool call had no id");
                }
                call
            })
            .collect();

        let mut inner = self.inner.lock();
        if !calls.is_empty() {
            inner
                .memory
                .add_message(Message::assistant_with_tool_calls(response.text.clone(), calls.clone()));
        } else if !response.text.is_empty() {
            inner.memory.add_message(Message::assistant(response.text.clone()));
        }
        inner.pending_calls = calls;
        inner.last_reply = response.text.clone();
    }

    fn finish_on_token_limit(&self, detail: &str) {
        warn!(agent_id = %self.id, detail, "Token limit exceeded, finishing agent");
        let mut inner = self.inner.lock();
        inner.memory.add_message(Message::assistant(format!(
            "Maximum token limit reached, cannot continue execution: {}",
            detail
        )));
        inner.state = AgentState::Finished;
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

impl Stepper for ReasoningAgent {
    fn think(&self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let prompt = self.next_step_prompt().filter(|p| !p.is_empty());
            if let Some(prompt) = prompt {
                self.add_message(Message::user(prompt));
            }

            let messages = self.messages();
            let tools = self.tools.definitions();
            let response = match self.llm.chat(&self.model, messages, &tools).await {
                Ok(response) => response,
                Err(QuorumError::TokenLimitExceeded(detail)) => {
                    self.finish_on_token_limit(&detail);
                    return Ok(false);
                }
                Err(e) => {
                    error!(agent_id = %self.id, step = self.current_step(), error = %e, "Think failed");
                    let mut inner = self.inner.lock();
                    inner.pending_calls.clear();
                    inner.last_reply = format!("Error encountered while processing: {}", e);
                    return Ok(false);
                }
            };

            debug!(
                agent_id = %self.id,
                tool_calls = response.tool_calls.len(),
                "Agent selected tools"
            );
            self.record_reply(&response);
            Ok(response.has_tool_calls())
        })
    }

    fn act(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let mut calls = std::mem::take(&mut self.inner.lock().pending_calls);
            if calls.is_empty() {
                return Ok(self.idle_result());
            }

            let call = CallContext::new();
            let _binding = self.registry.bind_call(&call, &self.id);
            let registry: Arc<dyn AgentLookup> = self.registry.clone();
            let ctx = ToolContext::new(self.session_id.clone()).with_call(call, registry);

            let mut outputs = Vec::new();
            let mut rounds = 0;
            while !calls.is_empty() {
                rounds += 1;
                let terminating = calls.iter().any(|c| c.name == TERMINATE_TOOL);

                for outcome in self.tools.call_tools(calls, ctx.clone()).await {
                    debug!(
                        agent_id = %self.id,
                        tool = %outcome.call.name,
                        is_error = outcome.result.is_error,
                        "Tool completed"
                    );
                    self.publish(WorkflowEvent::ToolExecuted {
                        agent_id: self.id.clone(),
                        tool: outcome.call.name.clone(),
                        is_error: outcome.result.is_error,
                    });
                    self.add_message(Message::tool(&outcome.call.id, &outcome.result.content)?);
                    outputs.push(format!(
                        "Observed output of cmd `{}` executed:\n{}",
                        outcome.call.name, outcome.result.content
                    ));
                }

                if terminating || self.state() == AgentState::Finished {
                    break;
                }
                if rounds >= self.max_steps {
                    warn!(agent_id = %self.id, rounds, "Tool follow-up limit reached");
                    break;
                }

                self.add_message(Message::user(FOLLOW_UP_PROMPT));
                let messages = self.messages();
                let tools = self.tools.definitions();
                let response = match self.llm.chat(&self.model, messages, &tools).await {
                    Ok(response) => response,
                    Err(QuorumError::TokenLimitExceeded(detail)) => {
                        self.finish_on_token_limit(&detail);
                        break;
                    }
                    Err(e) => {
                        error!(agent_id = %self.id, error = %e, "Tool follow-up failed");
                        break;
                    }
                };

                self.record_reply(&response);
                if !response.text.is_empty() {
                    outputs.push(response.text.clone());
                }
                calls = std::mem::take(&mut self.inner.lock().pending_calls);
            }

            Ok(outputs.join("\n\n"))
        })
    }

    fn idle_result(&self) -> String {
        let reply = self.inner.lock().last_reply.clone();
        if reply.is_empty() {
            NO_ACTION.to_string()
        } else {
            reply
        }
    }
}

impl AgentHandle for ReasoningAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> AgentState {
        ReasoningAgent::state(self)
    }

    fn finish(&self, closing_message: &str) {
        let mut inner = self.inner.lock();
        inner.memory.add_message(Message::assistant(closing_message));
        inner.state = AgentState::Finished;
    }
}

impl std::fmt::Debug for ReasoningAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningAgent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Guards a state the agent has already entered. Any error, panic, or
/// cancellation leaves the agent in `Error`; on success `previous` comes
/// back unless the agent ended in `Error` or `Finished`.
struct StateScope<'a> {
    agent: &'a ReasoningAgent,
    previous: AgentState,
    armed: bool,
}

impl<'a> StateScope<'a> {
    fn entered(agent: &'a ReasoningAgent, previous: AgentState) -> Self {
        Self {
            agent,
            previous,
            armed: true,
        }
    }

    fn close<T>(mut self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.armed = false;
            let mut inner = self.agent.inner.lock();
            if !matches!(inner.state, AgentState::Error | AgentState::Finished) {
                inner.state = self.previous;
            }
        }
        result
    }
}

impl Drop for StateScope<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.agent.inner.lock().state = AgentState::Error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_test_utils::{test_config, ScriptedLlm};
    use quorum_tools::ToolRegistry;
    use serde_json::json;

    fn build(llm: &ScriptedLlm, tools: &[&str], max_steps: usize) -> Arc<ReasoningAgent> {
        let config = test_config();
        let names: Vec<String> = tools.iter().map(|t| t.to_string()).collect();
        let registry = Arc::new(AgentRegistry::new());
        let settings = AgentSettings {
            max_steps,
            ..AgentSettings::from_config(&config)
        };
        Arc::new(
            ReasoningAgent::new(
                "tester",
                "test",
                Arc::new(llm.clone()),
                config.model.clone(),
                Arc::new(ToolRegistry::with_builtins(&config).subset(&names)),
                registry,
            )
            .with_settings(&settings)
            .with_system_prompt("You are a test agent."),
        )
    }

    #[tokio::test]
    async fn run_requires_initialize() {
        let agent = build(&ScriptedLlm::new(), &["terminate"], 3);
        let err = agent.run("hi").await.unwrap_err();
        assert!(matches!(err, QuorumError::AgentNotInitialized(_)));

        agent.initialize().unwrap();
        let err = agent.initialize().unwrap_err();
        assert!(matches!(err, QuorumError::AgentAlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn initialize_appends_meta_and_registers() {
        let agent = build(&ScriptedLlm::new(), &["terminate"], 3);
        agent.initialize().unwrap();

        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are a test agent."));
        assert!(prompt.contains(&format!("Your agent ID is: {}", agent.id())));
        assert_eq!(agent.messages()[0].role(), Role::System);
        assert!(agent.registry.contains(agent.id()));
    }

    #[tokio::test]
    async fn terminate_finishes_in_one_step() {
        let llm = ScriptedLlm::new();
        let agent = build(&llm, &["terminate"], 5);
        let _ = llm
            .clone()
            .with_tool_call("terminate", json!({"status": "success", "agent_id": agent.id()}));
        agent.initialize().unwrap();

        let output = agent.run("wrap up").await.unwrap();

        assert_eq!(agent.state(), AgentState::Finished);
        assert_eq!(llm.request_count(), 1);
        assert!(output.starts_with("Step 1:"));
        assert!(!output.contains("Step 2:"));
        assert!(output.contains("Terminated the current interaction with status: success"));
        assert!(agent
            .messages()
            .iter()
            .any(|m| m.role() == Role::Assistant
                && m.content() == "The task has been completed successfully. Thank you!"));
    }

    #[tokio::test]
    async fn terminate_without_id_resolves_through_call_context() {
        let llm = ScriptedLlm::new();
        let agent = build(&llm, &["terminate"], 5);
        // Shares the registry; must not be the one terminated.
        let other = Arc::new(ReasoningAgent::new(
            "other",
            "test",
            Arc::new(ScriptedLlm::new()),
            ModelConfig::new("m"),
            Arc::new(ToolRegistry::new()),
            Arc::clone(&agent.registry),
        ));
        let _ = llm.clone().with_tool_call("terminate", json!({"status": "failure"}));

        agent.initialize().unwrap();
        other.initialize().unwrap();
        agent.run("stop").await.unwrap();

        assert_eq!(agent.state(), AgentState::Finished);
        assert_eq!(other.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn finished_agent_can_run_again() {
        let llm = ScriptedLlm::new()
            .with_tool_call("terminate", json!({"status": "success"}))
            .with_tool_call("terminate", json!({"status": "success"}));
        let agent = build(&llm, &["terminate"], 5);
        agent.initialize().unwrap();

        agent.run("first").await.unwrap();
        assert_eq!(agent.state(), AgentState::Finished);
        let output = agent.run("second").await.unwrap();
        assert!(output.starts_with("Step 1:"));
        assert_eq!(agent.current_step(), 1);
    }

    #[tokio::test]
    async fn running_agent_rejects_run() {
        let agent = build(&ScriptedLlm::new(), &["terminate"], 3);
        agent.initialize().unwrap();
        agent.set_state(AgentState::Running);

        let err = agent.run("again").await.unwrap_err();
        assert!(matches!(
            err,
            QuorumError::InvalidAgentState {
                state: AgentState::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn step_budget_exhaustion_resets_to_idle() {
        let llm = ScriptedLlm::new().repeating("still thinking");
        let agent = build(&llm, &["terminate"], 3);
        agent.initialize().unwrap();

        let output = agent.run("loop").await.unwrap();

        assert_eq!(llm.request_count(), 3);
        assert!(output.contains("Step 3: still thinking"));
        assert!(output.ends_with("Terminated: Reached max steps (3)"));
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.current_step(), 0);
    }

    #[tokio::test]
    async fn repeated_replies_inject_stuck_prompt() {
        let llm = ScriptedLlm::new().repeating("same answer");
        let agent = build(&llm, &["terminate"], 4);
        agent.initialize().unwrap();

        agent.run("go").await.unwrap();

        let requests = llm.requests();
        assert!(!requests[2].transcript().contains(crate::guardian::STUCK_PROMPT));
        assert!(requests[3].transcript().contains(crate::guardian::STUCK_PROMPT));
    }

    #[tokio::test]
    async fn token_limit_in_think_finishes_run() {
        let llm = ScriptedLlm::new().with_token_limit();
        let agent = build(&llm, &["terminate"], 5);
        agent.initialize().unwrap();

        let output = agent.run("big").await.unwrap();

        assert_eq!(agent.state(), AgentState::Finished);
        assert_eq!(llm.request_count(), 1);
        assert!(output.starts_with("Step 1:"));
    }

    #[tokio::test]
    async fn other_think_errors_do_not_abort_the_run() {
        let llm = ScriptedLlm::new()
            .with_error("HTTP 500: upstream")
            .with_tool_call("terminate", json!({"status": "success"}));
        let agent = build(&llm, &["terminate"], 5);
        agent.initialize().unwrap();

        let output = agent.run("retry").await.unwrap();

        assert!(output.contains("Step 1: Error encountered while processing"));
        assert!(output.contains("Step 2:"));
        assert_eq!(agent.state(), AgentState::Finished);
    }

    #[tokio::test]
    async fn tool_results_get_a_conversational_follow_up() {
        let llm = ScriptedLlm::new()
            .with_tool_call("analyze_data", json!({"data": "1,2,3"}))
            .with_text("The data looks stable.")
            .with_tool_call("terminate", json!({"status": "success"}));
        let agent = build(&llm, &["analyze_data", "terminate"], 5);
        agent.initialize().unwrap();

        let output = agent.run("analyze").await.unwrap();

        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].transcript().contains(FOLLOW_UP_PROMPT));
        assert!(requests[1].transcript().contains("Data analysis result"));
        assert!(output.contains("Observed output of cmd `analyze_data` executed"));
        assert!(output.contains("The data looks stable."));
        assert!(output.contains("Step 2:"));
        assert_eq!(agent.state(), AgentState::Finished);
    }

    #[tokio::test]
    async fn tool_failures_are_folded_into_results() {
        let llm = ScriptedLlm::new()
            .with_tool_call("no_such_tool", json!({}))
            .with_text("That tool does not exist.")
            .with_tool_call("terminate", json!({"status": "failure"}));
        let agent = build(&llm, &["terminate"], 5);
        agent.initialize().unwrap();

        let output = agent.run("try").await.unwrap();

        assert!(output.contains("Tool not found: no_such_tool"));
        assert_eq!(agent.state(), AgentState::Finished);
    }

    #[test]
    fn failed_scope_leaves_error_state() {
        let agent = build(&ScriptedLlm::new(), &["terminate"], 3);
        agent.set_state(AgentState::Running);
        let result: Result<()> =
            StateScope::entered(&agent, AgentState::Idle).close(Err(QuorumError::Graph("boom".into())));
        assert!(result.is_err());
        assert_eq!(agent.state(), AgentState::Error);

        agent.set_state(AgentState::Running);
        let ok: Result<u8> = StateScope::entered(&agent, AgentState::Idle).close(Ok(1));
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(agent.state(), AgentState::Idle);

        agent.set_state(AgentState::Running);
        drop(StateScope::entered(&agent, AgentState::Idle));
        assert_eq!(agent.state(), AgentState::Error);
    }

    #[tokio::test]
    async fn tool_call_without_id_is_still_answered() {
        let llm = ScriptedLlm::new()
            .with_response(ChatResponse {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: String::new(),
                    name: "analyze_data".into(),
                    arguments: json!({"data": "1,2,3"}),
                }],
                usage: None,
            })
            .with_text("Looks stable.")
            .with_tool_call("terminate", json!({"status": "success"}));
        let agent = build(&llm, &["analyze_data", "terminate"], 5);
        agent.initialize().unwrap();

        let output = agent.run("analyze").await.unwrap();

        assert!(output.contains("Observed output of cmd `analyze_data` executed"));
        assert_eq!(agent.state(), AgentState::Finished);
        let messages = agent.messages();
        let issued = messages
            .iter()
            .find(|m| m.tool_calls().iter().any(|c| c.name == "analyze_data"))
            .unwrap();
        let call_id = issued.tool_calls()[0].id.clone();
        assert!(call_id.starts_with("call_"));
        assert!(messages
            .iter()
            .any(|m| m.role() == Role::Tool && m.tool_call_id() == Some(call_id.as_str())));
    }

    /// Yields once before answering, so concurrent callers interleave.
    struct YieldingLlm(ScriptedLlm);

    impl LlmClient for YieldingLlm {
        fn chat(
            &self,
            config: &ModelConfig,
            messages: Vec<Message>,
            tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<ChatResponse>> {
            let reply = self.0.chat(config, messages, tools);
            Box::pin(async move {
                tokio::task::yield_now().await;
                reply.await
            })
        }
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected() {
        let config = test_config();
        let llm = ScriptedLlm::new().with_tool_call("terminate", json!({"status": "success"}));
        let agent = Arc::new(ReasoningAgent::new(
            "tester",
            "test",
            Arc::new(YieldingLlm(llm.clone())),
            config.model.clone(),
            Arc::new(ToolRegistry::with_builtins(&config).subset(&["terminate".to_string()])),
            Arc::new(AgentRegistry::new()),
        ));
        agent.initialize().unwrap();

        let (first, second) = tokio::join!(agent.run("one"), agent.run("two"));

        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(QuorumError::InvalidAgentState {
                state: AgentState::Running,
                ..
            })
        ));
        assert_eq!(llm.request_count(), 1);
        assert_eq!(agent.state(), AgentState::Finished);
    }
}
