//! Remote agents reached over A2A (agent-to-agent) calls.

pub mod card;
pub mod client;
pub mod invoker;
pub mod registry;

pub use card::{AgentCapabilities, AgentFeatures, SkillDescriptor};
pub use client::{A2aClient, HttpA2aClient};
pub use invoker::RemoteAgentNode;
pub use registry::A2aRegistry;
