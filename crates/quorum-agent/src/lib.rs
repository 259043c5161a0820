//! Agents and the multi-agent workflow.
//!
//! A [`WorkflowEngine`] runs a coordinator-centred graph: the coordinator
//! picks an action, agent nodes run fresh [`ReasoningAgent`]s built by the
//! [`AgentFactory`], remote nodes delegate to A2A peers, and the summary
//! node writes the final reply. Agents find each other, and tools find
//! their caller, through the shared [`AgentRegistry`].

pub mod agent;
pub mod engine;
pub mod factory;
pub mod graph;
pub mod guardian;
pub mod nodes;
pub mod prompt;
pub mod registry;
pub mod remote;
pub mod session;

pub use agent::{AgentSettings, ReasoningAgent, Stepper};
pub use engine::{EngineBuilder, SessionRun, WorkflowEngine, WorkflowOutcome};
pub use factory::{AgentFactory, AgentProfile};
pub use graph::{CompiledGraph, Node, RunConfig, SessionState, StateGraph, StateSchema, StateUpdate};
pub use prompt::PromptLoader;
pub use registry::{AgentRegistry, CallBinding, Registration};
pub use remote::{A2aClient, A2aRegistry, HttpA2aClient, RemoteAgentNode};
pub use session::SessionManager;
