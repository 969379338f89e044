//! Graph construction and compilation.
//!
//! A [`StateGraph`] accumulates nodes, edges, and interrupt points, then
//! `compile()` validates the whole structure and produces an immutable
//! [`CompiledGraph`]. Validation collects every violation it finds so a
//! misbuilt graph is reported in one pass.

use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::executor::CompiledGraph;
use crate::graph::{Edge, NodeExecutor, Router, END, START};
use crate::state::{MergePolicy, StateSchema};

/// Mutable graph definition.
#[derive(Clone)]
pub struct StateGraph {
    schema: StateSchema,
    nodes: HashMap<String, NodeExecutor>,
    node_order: Vec<String>,
    edges: HashMap<String, Vec<Edge>>,
    interrupt_before: Vec<String>,
    interrupt_after: Vec<String>,
}

impl StateGraph {
    pub fn new(schema: StateSchema) -> Self {
        Self {
            schema,
            nodes: HashMap::new(),
            node_order: Vec::new(),
            edges: HashMap::new(),
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
        }
    }

    /// Registers a node. Re-registering a name replaces its executor but
    /// keeps its original position in the registration order.
    pub fn add_node(mut self, name: impl Into<String>, executor: NodeExecutor) -> Self {
        let name = name.into();
        if self.nodes.insert(name.clone(), executor).is_none() {
            self.node_order.push(name);
        }
        self
    }

    /// Adds a fixed edge. Multiple edges from one source fan out.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Adds a conditional edge whose router picks one of the declared
    /// branch labels after each step.
    pub fn add_conditional_edges(
        mut self,
        from: impl Into<String>,
        router: Router,
        branches: HashMap<String, String>,
    ) -> Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Conditional { router, branches });
        self
    }

    /// Declares the entry node. Equivalent to `add_edge(START, name)`.
    pub fn set_entry(self, name: impl Into<String>) -> Self {
        self.add_edge(START, name)
    }

    /// Halts execution before any of the named nodes runs.
    pub fn interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_before.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Halts execution after any of the named nodes completes.
    pub fn interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_after.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Validates the graph and produces an immutable executable form.
    ///
    /// Every violation found is collected into one
    /// [`GraphError::Definition`]. The builder is borrowed, so it can be
    /// recompiled into independent instances.
    pub fn compile(&self) -> Result<CompiledGraph> {
        let mut violations = Vec::new();

        for name in &self.node_order {
            if name.is_empty() || name == START || name == END {
                violations.push(format!("node name '{name}' is reserved"));
            }
        }

        if !self.edges.contains_key(START) {
            violations.push("graph has no entry point (set_entry or an edge from START)".to_string());
        }

        for (source, edges) in &self.edges {
            if source != START && !self.nodes.contains_key(source) {
                violations.push(format!("edge source '{source}' is not a registered node"));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(target) => {
                        if target != END && !self.nodes.contains_key(target) {
                            violations.push(format!(
                                "edge target '{target}' from '{source}' is not a registered node"
                            ));
                        }
                    }
                    Edge::Conditional { branches, .. } => {
                        if branches.is_empty() {
                            violations.push(format!(
                                "conditional edge from '{source}' declares no branches"
                            ));
                        }
                        for (label, target) in branches {
                            if target != END && !self.nodes.contains_key(target) {
                                violations.push(format!(
                                    "branch '{label}' from '{source}' targets unregistered node '{target}'"
                                ));
                            }
                        }
                    }
                }
            }
        }

        for name in self.interrupt_before.iter().chain(&self.interrupt_after) {
            if !self.nodes.contains_key(name) {
                violations.push(format!("interrupt node '{name}' is not registered"));
            }
        }

        if self.schema.policy("messages") != Some(MergePolicy::Append) {
            violations.push("schema must declare an append-policy 'messages' field".to_string());
        }

        if !violations.is_empty() {
            return Err(GraphError::Definition(violations));
        }

        Ok(CompiledGraph::from_parts(
            self.schema.clone(),
            self.nodes.clone(),
            self.node_order.clone(),
            self.edges.clone(),
            self.interrupt_before.iter().cloned().collect::<HashSet<_>>(),
            self.interrupt_after.iter().cloned().collect::<HashSet<_>>(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node_fn;
    use serde_json::Value;
    use std::sync::Arc;

    fn noop() -> NodeExecutor {
        node_fn(|_: Value| async { Ok(Value::Null) })
    }

    #[test]
    fn valid_graph_compiles() {
        let graph = StateGraph::new(StateSchema::new().with_messages())
            .add_node("a", noop())
            .add_node("b", noop())
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge("b", END);
        assert!(graph.compile().is_ok());
        // Recompiling the same builder yields an independent instance.
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn compile_collects_all_violations() {
        let graph = StateGraph::new(StateSchema::new())
            .add_node("a", noop())
            .add_edge("a", "missing")
            .add_conditional_edges("ghost", Arc::new(|_| "x".to_string()), HashMap::new())
            .interrupt_before(["nope"]);
        let err = graph.compile().unwrap_err();
        let GraphError::Definition(violations) = err else {
            panic!("expected Definition error");
        };
        let text = violations.join("\n");
        assert!(text.contains("no entry point"));
        assert!(text.contains("'missing'"));
        assert!(text.contains("'ghost'"));
        assert!(text.contains("declares no branches"));
        assert!(text.contains("'nope'"));
        assert!(text.contains("messages"));
        assert!(violations.len() >= 6);
    }

    #[test]
    fn reserved_node_names_are_rejected() {
        let graph = StateGraph::new(StateSchema::new().with_messages())
            .add_node(START, noop())
            .set_entry(START);
        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn branch_targets_may_be_end() {
        let graph = StateGraph::new(StateSchema::new().with_messages())
            .add_node("a", noop())
            .set_entry("a")
            .add_conditional_edges(
                "a",
                Arc::new(|state: &Value| {
                    if state["messages"].as_array().map(Vec::len).unwrap_or(0) > 2 {
                        "stop".to_string()
                    } else {
                        "again".to_string()
                    }
                }),
                HashMap::from([
                    ("again".to_string(), "a".to_string()),
                    ("stop".to_string(), END.to_string()),
                ]),
            );
        assert!(graph.compile().is_ok());
    }
}
