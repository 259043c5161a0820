use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tracing::{debug, error};

use quorum_core::error::{QuorumError, Result};

use super::edge::{Edge, END};
use super::node::{Node, RunConfig};
use super::state::{SessionState, StateSchema, StateUpdate};

/// One streamed step: the node that ran and the state after its update.
#[derive(Debug, Clone)]
pub struct GraphStep {
    pub node: String,
    pub state: SessionState,
}

/// Builder for a workflow graph.
pub struct StateGraph {
    schema: StateSchema,
    nodes: Vec<Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry: Option<String>,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
        }
    }

    pub fn add_node(self, node: impl Node) -> Self {
        self.add_node_arc(Arc::new(node))
    }

    pub fn add_node_arc(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::direct(from, to));
        self
    }

    pub fn add_conditional_edges(
        mut self,
        from: impl Into<String>,
        router: impl Fn(&SessionState) -> String + Send + Sync + 'static,
        targets: Vec<String>,
        fallback: impl Into<String>,
    ) -> Self {
        self.edges
            .push(Edge::conditional(from, router, targets, fallback));
        self
    }

    pub fn set_entry_point(mut self, node: impl Into<String>) -> Self {
        self.entry = Some(node.into());
        self
    }

    pub fn compile(self) -> Result<CompiledGraph> {
        let entry = self
            .entry
            .ok_or_else(|| QuorumError::Graph("no entry point set".into()))?;
        CompiledGraph::compile(self.schema, self.nodes, self.edges, entry)
    }
}

/// A validated, executable graph.
pub struct CompiledGraph {
    schema: StateSchema,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Edge>,
    entry: String,
}

impl CompiledGraph {
    /// Validate and freeze a graph.
    ///
    /// Rejects duplicate or reserved node names, edges that reference
    /// unknown nodes, nodes with zero or several outgoing edges, and nodes
    /// that write keys the schema does not declare.
    pub fn compile(
        schema: StateSchema,
        nodes: Vec<Arc<dyn Node>>,
        edges: Vec<Edge>,
        entry: impl Into<String>,
    ) -> Result<Self> {
        let entry = entry.into();

        let mut node_map: HashMap<String, Arc<dyn Node>> = HashMap::new();
        for node in nodes {
            let name = node.name().to_string();
            if name == END {
                return Err(QuorumError::Graph(format!("'{}' is a reserved node name", END)));
            }
            for key in node.writes() {
                if !schema.declares(key) {
                    return Err(QuorumError::UndeclaredStateKey(format!("{} (written by {})", key, name)));
                }
            }
            if node_map.insert(name.clone(), node).is_some() {
                return Err(QuorumError::Graph(format!("duplicate node '{}'", name)));
            }
        }

        if !node_map.contains_key(&entry) {
            return Err(QuorumError::Graph(format!("entry node '{}' not found", entry)));
        }

        let mut edge_map: HashMap<String, Edge> = HashMap::new();
        for edge in edges {
            let from = edge.from().to_string();
            if !node_map.contains_key(&from) {
                return Err(QuorumError::Graph(format!("edge from unknown node '{}'", from)));
            }
            if let Some(to) = edge
                .destinations()
                .into_iter()
                .find(|to| *to != END && !node_map.contains_key(*to))
            {
                return Err(QuorumError::Graph(format!(
                    "edge from '{}' to unknown node '{}'",
                    from, to
                )));
            }
            if edge_map.insert(from.clone(), edge).is_some() {
                return Err(QuorumError::Graph(format!(
                    "node '{}' has more than one outgoing edge",
                    from
                )));
            }
        }

        if let Some(name) = node_map.keys().find(|name| !edge_map.contains_key(*name)) {
            return Err(QuorumError::Graph(format!("node '{}' has no outgoing edge", name)));
        }

        Ok(Self {
            schema,
            nodes: node_map,
            edges: edge_map,
            entry,
        })
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Execute from the entry node, yielding the state after every node.
    ///
    /// The stream ends when a node routes to [`END`] or the state reports
    /// `finished`. Exceeding `config.recursion_limit` yields a final
    /// `MaxIterations` error. Each call starts a fresh run.
    pub fn stream(
        &self,
        initial: SessionState,
        config: RunConfig,
    ) -> BoxStream<'_, Result<GraphStep>> {
        let cursor = Cursor {
            state: initial,
            next: Some(self.entry.clone()),
            steps: 0,
        };

        stream::unfold((cursor, config), move |(mut cursor, config)| async move {
            let node_name = cursor.next.take()?;

            if cursor.steps >= config.recursion_limit {
                error!(
                    thread_id = %config.thread_id,
                    steps = cursor.steps,
                    "Recursion limit reached"
                );
                let err = QuorumError::MaxIterations(cursor.steps);
                return Some((Err(err), (cursor, config)));
            }
            cursor.steps += 1;

            let Some(node) = self.nodes.get(&node_name) else {
                let err = QuorumError::Graph(format!("node '{}' not found", node_name));
                return Some((Err(err), (cursor, config)));
            };

            let update = self.run_node(node, &cursor.state, &config).await;
            if let Err(e) = cursor.state.apply(&self.schema, update) {
                error!(node = %node_name, thread_id = %config.thread_id, error = %e, "State merge failed");
                return Some((Err(e), (cursor, config)));
            }

            if !cursor.state.is_finished() {
                let target = self.route(&node_name, &cursor.state);
                debug!(node = %node_name, next = %target, "Routed");
                if target != END {
                    cursor.next = Some(target);
                }
            }

            let step = GraphStep {
                node: node_name,
                state: cursor.state.clone(),
            };
            Some((Ok(step), (cursor, config)))
        })
        .boxed()
    }

    /// Drive `stream` to completion and return the final state.
    pub async fn invoke(&self, initial: SessionState, config: RunConfig) -> Result<SessionState> {
        let mut last = initial.clone();
        let mut steps = self.stream(initial, config);
        while let Some(step) = steps.next().await {
            last = step?.state;
        }
        Ok(last)
    }

    fn route(&self, node: &str, state: &SessionState) -> String {
        match self.edges.get(node) {
            Some(edge) => edge.resolve(state),
            None => END.to_string(),
        }
    }

    async fn run_node(
        &self,
        node: &Arc<dyn Node>,
        state: &SessionState,
        config: &RunConfig,
    ) -> StateUpdate {
        let name = node.name();
        debug!(node = name, thread_id = %config.thread_id, "Running node");

        match AssertUnwindSafe(node.run(state, config)).catch_unwind().await {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => {
                error!(
                    node = name,
                    session_id = %config.session_id,
                    thread_id = %config.thread_id,
                    error = %e,
                    "Node failed"
                );
                node.on_error(&e)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    node = name,
                    session_id = %config.session_id,
                    thread_id = %config.thread_id,
                    panic = %message,
                    "Node panicked"
                );
                node.on_error(&QuorumError::NodePanic {
                    node: name.to_string(),
                    message,
                })
            }
        }
    }
}

struct Cursor {
    state: SessionState,
    next: Option<String>,
    steps: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::keys;
    use futures::future::BoxFuture;
    use quorum_core::types::{Message, SessionId};

    /// Records a message and routes to a fixed target.
    struct Hop {
        name: &'static str,
        next: &'static str,
        finish: bool,
    }

    impl Node for Hop {
        fn name(&self) -> &str {
            self.name
        }

        fn writes(&self) -> &[&'static str] {
            &[keys::MESSAGES, keys::NEXT, keys::FINISHED]
        }

        fn run<'a>(
            &'a self,
            _state: &'a SessionState,
            _config: &'a RunConfig,
        ) -> BoxFuture<'a, Result<StateUpdate>> {
            Box::pin(async move {
                Ok(StateUpdate::new()
                    .message(Message::assistant(self.name))
                    .next(self.next)
                    .finished(self.finish))
            })
        }
    }

    struct Failing;

    impl Node for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn writes(&self) -> &[&'static str] {
            &[keys::ERROR]
        }

        fn run<'a>(
            &'a self,
            _state: &'a SessionState,
            _config: &'a RunConfig,
        ) -> BoxFuture<'a, Result<StateUpdate>> {
            Box::pin(async { Err::<StateUpdate, _>(QuorumError::LlmRequest("down".into())) })
        }
    }

    struct Panicking;

    impl Node for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn writes(&self) -> &[&'static str] {
            &[]
        }

        fn run<'a>(
            &'a self,
            _state: &'a SessionState,
            _config: &'a RunConfig,
        ) -> BoxFuture<'a, Result<StateUpdate>> {
            Box::pin(async {
                let exploded = true;
                if exploded {
                    panic!("node exploded");
                }
                Ok(StateUpdate::new())
            })
        }
    }

    fn hop(name: &'static str, next: &'static str) -> Hop {
        Hop {
            name,
            next,
            finish: false,
        }
    }

    fn route_by_next(s: &SessionState) -> String {
        s.next().unwrap_or_default().to_string()
    }

    fn config() -> RunConfig {
        RunConfig::new(SessionId::from("s"), "s_thread")
    }

    #[tokio::test]
    async fn streams_each_node_until_end() {
        let graph = StateGraph::new(StateSchema::session())
            .add_node(hop("a", "b"))
            .add_node(hop("b", END))
            .add_conditional_edges("a", route_by_next, vec!["b".into(), END.into()], END)
            .add_conditional_edges("b", route_by_next, vec!["a".into(), END.into()], END)
            .set_entry_point("a")
            .compile()
            .unwrap();

        let steps: Vec<GraphStep> = graph
            .stream(SessionState::new(), config())
            .map(|s| s.unwrap())
            .collect()
            .await;

        let visited: Vec<&str> = steps.iter().map(|s| s.node.as_str()).collect();
        assert_eq!(visited, vec!["a", "b"]);
        assert_eq!(steps[1].state.messages().len(), 2);
    }

    #[tokio::test]
    async fn finished_flag_stops_the_stream() {
        let graph = StateGraph::new(StateSchema::session())
            .add_node(Hop {
                name: "a",
                next: "b",
                finish: true,
            })
            .add_node(hop("b", END))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .compile()
            .unwrap();

        let state = graph.invoke(SessionState::new(), config()).await.unwrap();
        assert!(state.is_finished());
        assert_eq!(state.messages().len(), 1);
    }

    #[tokio::test]
    async fn recursion_limit_yields_max_iterations() {
        let graph = StateGraph::new(StateSchema::session())
            .add_node(hop("a", "b"))
            .add_node(hop("b", "a"))
            .add_edge("a", "b")
            .add_edge("b", "a")
            .set_entry_point("a")
            .compile()
            .unwrap();

        let results: Vec<Result<GraphStep>> = graph
            .stream(SessionState::new(), config().with_recursion_limit(5))
            .collect()
            .await;

        assert_eq!(results.len(), 6);
        assert!(results[..5].iter().all(|r| r.is_ok()));
        assert!(matches!(results[5], Err(QuorumError::MaxIterations(5))));
    }

    #[tokio::test]
    async fn node_errors_become_error_updates() {
        let graph = StateGraph::new(StateSchema::session())
            .add_node(Failing)
            .add_edge("failing", END)
            .set_entry_point("failing")
            .compile()
            .unwrap();

        let state = graph.invoke(SessionState::new(), config()).await.unwrap();
        assert!(state.is_finished());
        assert!(state.error().unwrap().contains("down"));
        assert!(state.messages()[0].content().contains("failing failed"));
    }

    #[tokio::test]
    async fn node_panics_are_contained() {
        let graph = StateGraph::new(StateSchema::session())
            .add_node(Panicking)
            .add_edge("panicking", END)
            .set_entry_point("panicking")
            .compile()
            .unwrap();

        let state = graph.invoke(SessionState::new(), config()).await.unwrap();
        assert!(state.error().unwrap().contains("node exploded"));
    }

    #[test]
    fn compile_rejects_bad_graphs() {
        let missing_target = StateGraph::new(StateSchema::session())
            .add_node(hop("a", "b"))
            .add_edge("a", "b")
            .set_entry_point("a")
            .compile();
        assert!(matches!(missing_target, Err(QuorumError::Graph(_))));

        let no_edge = StateGraph::new(StateSchema::session())
            .add_node(hop("a", END))
            .set_entry_point("a")
            .compile();
        assert!(matches!(no_edge, Err(QuorumError::Graph(_))));

        let bad_entry = StateGraph::new(StateSchema::session())
            .add_node(hop("a", END))
            .add_edge("a", END)
            .set_entry_point("zzz")
            .compile();
        assert!(matches!(bad_entry, Err(QuorumError::Graph(_))));

        let duplicate = StateGraph::new(StateSchema::session())
            .add_node(hop("a", END))
            .add_node(hop("a", END))
            .add_edge("a", END)
            .set_entry_point("a")
            .compile();
        assert!(matches!(duplicate, Err(QuorumError::Graph(_))));
    }

    #[test]
    fn compile_rejects_undeclared_writes() {
        let schema = StateSchema::new().overwrite(keys::NEXT);
        let result = StateGraph::new(schema)
            .add_node(hop("a", END))
            .add_edge("a", END)
            .set_entry_point("a")
            .compile();
        assert!(matches!(result, Err(QuorumError::UndeclaredStateKey(_))));
    }
}
