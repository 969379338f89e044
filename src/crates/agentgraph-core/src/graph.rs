//! Graph primitives: node executors, edges, and the marker endpoints.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BoxError;

/// Virtual entry point. Edges from `START` define where execution begins.
pub const START: &str = "__start__";

/// Virtual exit point. Routing to `END` terminates the run.
pub const END: &str = "__end__";

/// Future returned by a node function.
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;

/// An async node function. Receives the current state and returns a partial
/// update to merge, never the full state.
pub type NodeExecutor = Arc<dyn Fn(Value) -> NodeFuture + Send + Sync>;

/// Routing function for conditional edges. Inspects the post-update state
/// and returns a branch label.
pub type Router = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Wraps an async closure into a [`NodeExecutor`].
pub fn node_fn<F, Fut>(f: F) -> NodeExecutor
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

/// An outgoing edge of a node.
#[derive(Clone)]
pub enum Edge {
    /// Always proceed to the named node (or `END`).
    Direct(String),
    /// Invoke `router` on the post-update state; the returned label must
    /// appear in `branches`.
    Conditional {
        router: Router,
        branches: HashMap<String, String>,
    },
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Direct(target) => f.debug_tuple("Direct").field(target).finish(),
            Edge::Conditional { branches, .. } => f
                .debug_struct("Conditional")
                .field("branches", branches)
                .finish(),
        }
    }
}
