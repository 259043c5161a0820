//! Workflow graph: named nodes, one outgoing edge per node, and a
//! schema-checked session state.
//!
//! A [`StateGraph`] is compiled into a [`CompiledGraph`], which streams the
//! state after every node until a node routes to [`END`] or the state is
//! marked finished. Node failures and panics are turned into error updates
//! at the node boundary.

pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use edge::{Edge, Router, END};
pub use executor::{CompiledGraph, GraphStep, StateGraph};
pub use node::{Node, RunConfig};
pub use state::{keys, MergePolicy, SessionState, StateSchema, StateUpdate, StateValue};
