use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QuorumError, Result};

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A chat message in the conversation.
///
/// Messages are immutable once built. A `tool` message always carries the id
/// of the call it answers; construction fails otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<RawMessage> for Message {
    type Error = QuorumError;

    fn try_from(raw: RawMessage) -> Result<Self> {
        let mut msg = Message::new(raw.role, raw.content, raw.tool_call_id)?;
        msg.image = raw.image;
        msg.tool_calls = raw.tool_calls;
        msg.timestamp = raw.timestamp;
        Ok(msg)
    }
}

impl Message {
    /// Build a message, validating the tool-call id rule.
    pub fn new(
        role: Role,
        content: impl Into<String>,
        tool_call_id: Option<String>,
    ) -> Result<Self> {
        let tool_call_id = tool_call_id.filter(|id| !id.trim().is_empty());
        if role == Role::Tool && tool_call_id.is_none() {
            return Err(QuorumError::InvalidMessage(
                "tool messages require a non-empty tool_call_id".into(),
            ));
        }
        Ok(Self {
            role,
            content: content.into(),
            image: None,
            tool_call_id,
            tool_calls: Vec::new(),
            timestamp: Some(Utc::now()),
        })
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// An assistant turn that requests tool calls.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::plain(Role::Assistant, text);
        msg.tool_calls = calls;
        msg
    }

    /// The result of a tool call, answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        Self::new(Role::Tool, content, Some(tool_call_id.into()))
    }

    /// Attach a base64-encoded image payload.
    pub fn with_image(mut self, base64: impl Into<String>) -> Self {
        self.image = Some(base64.into());
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A complete (non-streamed) model reply.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Outcome of one call in a tool batch, in request order.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: ToolResult,
}

/// Lifecycle state of a reasoning agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Identifies one tool-execution batch issued on behalf of a single agent.
///
/// The agent registry binds a call id to the issuing agent for the lifetime
/// of the batch, so tools can discover who invoked them.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CallContext {
    pub call_id: String,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What a tool may do to the agent that invoked it.
pub trait AgentHandle: Send + Sync + 'static {
    fn agent_id(&self) -> &str;

    fn state(&self) -> AgentState;

    /// Record a closing assistant message and mark the agent finished.
    fn finish(&self, closing_message: &str);
}

/// Agent lookup without a dependency on the agent crate.
pub trait AgentLookup: Send + Sync + 'static {
    fn agent(&self, agent_id: &str) -> Option<Arc<dyn AgentHandle>>;

    /// Resolve the agent executing `call`, falling back to running, then
    /// most recently activated, then any registered agent.
    fn current_agent(&self, call: Option<&CallContext>) -> Option<Arc<dyn AgentHandle>>;
}

/// Context passed to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub call: Option<CallContext>,
    pub agents: Option<Arc<dyn AgentLookup>>,
}

impl ToolContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            call: None,
            agents: None,
        }
    }

    pub fn with_call(mut self, call: CallContext, agents: Arc<dyn AgentLookup>) -> Self {
        self.call = Some(call);
        self.agents = Some(agents);
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("call", &self.call)
            .field("agents", &self.agents.is_some())
            .finish()
    }
}

/// Workflow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A workflow run started.
    RunStarted { session_id: SessionId, thread_id: String },
    /// A node finished and its update was merged.
    NodeCompleted { thread_id: String, node: String, iteration: usize },
    /// An agent tool was executed.
    ToolExecuted { agent_id: String, tool: String, is_error: bool },
    /// The run completed normally.
    RunCompleted { session_id: SessionId, iterations: usize },
    /// The run was stopped by the iteration cap.
    ForcedTermination { session_id: SessionId, iterations: usize },
    /// The run failed with a fault that was converted to text.
    RunError { session_id: SessionId, error: String },
}
