use thiserror::Error;

use crate::types::AgentState;

#[derive(Debug, Error)]
pub enum QuorumError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("Token limit exceeded: {0}")]
    TokenLimitExceeded(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Agent errors
    #[error("Cannot run agent {agent} from state {state}")]
    InvalidAgentState { agent: String, state: AgentState },

    #[error("Agent already initialized: {0}")]
    AgentAlreadyInitialized(String),

    #[error("Agent not initialized: {0}")]
    AgentNotInitialized(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // Workflow errors
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("State key '{0}' has no declared merge policy")]
    UndeclaredStateKey(String),

    #[error("Workflow exceeded max iterations ({0})")]
    MaxIterations(usize),

    #[error("Node '{node}' panicked: {message}")]
    NodePanic { node: String, message: String },

    // Remote agent errors
    #[error("Remote agent error: {agent}: {message}")]
    Remote { agent: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QuorumError>;
