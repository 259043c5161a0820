use futures::future::BoxFuture;

use quorum_core::error::{QuorumError, Result};
use quorum_core::types::{Message, SessionId};

use super::state::{SessionState, StateUpdate};

/// Per-run settings handed to every node.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Scopes one run's transient state; unique per invocation.
    pub thread_id: String,
    pub session_id: SessionId,
    /// Node executions allowed before the stream fails with `MaxIterations`.
    pub recursion_limit: usize,
}

impl RunConfig {
    pub fn new(session_id: SessionId, thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            session_id,
            recursion_limit: 100,
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }
}

/// A unit of graph execution: reads the state, returns a partial update.
///
/// `run` may fail; the executor then asks `on_error` for the update to
/// merge instead, so a fault never escapes the node boundary.
pub trait Node: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// State keys this node may write. Checked against the schema when the
    /// graph is compiled.
    fn writes(&self) -> &[&'static str];

    fn run<'a>(
        &'a self,
        state: &'a SessionState,
        config: &'a RunConfig,
    ) -> BoxFuture<'a, Result<StateUpdate>>;

    /// Update merged when `run` fails or panics. Ends the run by default.
    fn on_error(&self, error: &QuorumError) -> StateUpdate {
        StateUpdate::new()
            .error(error.to_string())
            .message(Message::assistant(format!(
                "{} failed to process the request: {}",
                self.name(),
                error
            )))
            .finished(true)
    }
}
