use std::sync::Arc;

use tracing::warn;

use super::state::SessionState;

/// Terminal marker: routing here ends the run.
pub const END: &str = "__end__";

/// Chooses the next node from the post-merge state.
pub type Router = Arc<dyn Fn(&SessionState) -> String + Send + Sync>;

/// An outgoing edge. Each node has exactly one.
#[derive(Clone)]
pub enum Edge {
    /// Always go to `to`.
    Direct { from: String, to: String },
    /// Ask `router`; anything outside `targets` goes to `fallback`.
    Conditional {
        from: String,
        router: Router,
        targets: Vec<String>,
        fallback: String,
    },
}

impl Edge {
    pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Direct {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn conditional(
        from: impl Into<String>,
        router: impl Fn(&SessionState) -> String + Send + Sync + 'static,
        targets: Vec<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self::Conditional {
            from: from.into(),
            router: Arc::new(router),
            targets,
            fallback: fallback.into(),
        }
    }

    pub fn from(&self) -> &str {
        match self {
            Self::Direct { from, .. } | Self::Conditional { from, .. } => from,
        }
    }

    /// Every node this edge can lead to, fallback included.
    pub fn destinations(&self) -> Vec<&str> {
        match self {
            Self::Direct { to, .. } => vec![to.as_str()],
            Self::Conditional {
                targets, fallback, ..
            } => targets
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(fallback.as_str()))
                .collect(),
        }
    }

    /// The next node for `state`. Never leaves the declared destinations.
    pub fn resolve(&self, state: &SessionState) -> String {
        match self {
            Self::Direct { to, .. } => to.clone(),
            Self::Conditional {
                from,
                router,
                targets,
                fallback,
            } => {
                let choice = router(state);
                if targets.iter().any(|t| *t == choice) {
                    choice
                } else {
                    warn!(node = %from, route = %choice, fallback = %fallback, "Unknown route, using fallback");
                    fallback.clone()
                }
            }
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct { from, to } => f
                .debug_struct("Direct")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::Conditional {
                from,
                targets,
                fallback,
                ..
            } => f
                .debug_struct("Conditional")
                .field("from", from)
                .field("targets", targets)
                .field("fallback", fallback)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::{StateSchema, StateUpdate};

    fn state_with_next(next: &str) -> SessionState {
        let mut state = SessionState::new();
        state
            .apply(&StateSchema::session(), StateUpdate::new().next(next))
            .unwrap();
        state
    }

    fn by_next() -> Edge {
        Edge::conditional(
            "coordinator",
            |s: &SessionState| s.next().unwrap_or_default().to_string(),
            vec!["search".into(), "summary".into()],
            "summary",
        )
    }

    #[test]
    fn direct_edge_always_resolves_to_target() {
        let edge = Edge::direct("search", "coordinator");
        assert_eq!(edge.resolve(&SessionState::new()), "coordinator");
        assert_eq!(edge.from(), "search");
    }

    #[test]
    fn conditional_edge_accepts_declared_targets() {
        assert_eq!(by_next().resolve(&state_with_next("search")), "search");
    }

    #[test]
    fn unknown_route_uses_fallback() {
        let edge = by_next();
        assert_eq!(edge.resolve(&state_with_next("teleport")), "summary");
        assert_eq!(edge.resolve(&SessionState::new()), "summary");
    }

    #[test]
    fn destinations_include_fallback() {
        let edge = Edge::conditional(
            "a",
            |_: &SessionState| String::new(),
            vec!["b".into()],
            END,
        );
        assert_eq!(edge.destinations(), vec!["b", END]);
    }
}
