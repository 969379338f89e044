//! The execution engine for compiled graphs.
//!
//! `CompiledGraph::invoke` drives the step loop on one conversation thread:
//! load or initialize state, run the current frontier of nodes, merge their
//! partial updates atomically, resolve the next frontier through the edges,
//! and persist checkpoints so the thread can be resumed, inspected, or
//! forked from any point in its history.
//!
//! Checkpoint cadence: a checkpoint is written for every step whose merged
//! update grows an append field, at every interrupt boundary, and at
//! termination. Replace-only interior steps are working-register updates;
//! their values ride along in the next snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use agentgraph_checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointSaver, CheckpointSource, CheckpointTuple,
};
use futures::future::join_all;
use futures::TryStreamExt;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{GraphError, Result};
use crate::graph::{Edge, NodeExecutor, END, START};
use crate::state::StateSchema;

/// Why an invocation returned before reaching `END`.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    /// The node at the boundary: the pending node for interrupt-before,
    /// the completed node for interrupt-after.
    pub node: String,
    /// Full state at the halt point.
    pub state: Value,
    /// Sequence number of the checkpoint covering the halt point, when a
    /// checkpointer is attached.
    pub seq: Option<u64>,
}

/// Result of a graph invocation.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    /// The run reached `END`; carries the final state.
    Complete(Value),
    /// The run halted at an interrupt point and can be resumed with a null
    /// input on the same thread.
    Interrupted(InterruptSignal),
}

/// An immutable, executable graph produced by `StateGraph::compile`.
#[derive(Clone)]
pub struct CompiledGraph {
    schema: StateSchema,
    nodes: HashMap<String, NodeExecutor>,
    node_order: Vec<String>,
    edges: HashMap<String, Vec<Edge>>,
    interrupt_before: HashSet<String>,
    interrupt_after: HashSet<String>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    step_timeout: Option<Duration>,
    locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CompiledGraph {
    pub(crate) fn from_parts(
        schema: StateSchema,
        nodes: HashMap<String, NodeExecutor>,
        node_order: Vec<String>,
        edges: HashMap<String, Vec<Edge>>,
        interrupt_before: HashSet<String>,
        interrupt_after: HashSet<String>,
    ) -> Self {
        Self {
            schema,
            nodes,
            node_order,
            edges,
            interrupt_before,
            interrupt_after,
            checkpointer: None,
            step_timeout: None,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Attaches a checkpoint store. Without one the graph still runs, but
    /// threads have no history and interrupted runs cannot be resumed.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Bounds the wall-clock time of a single step (one node batch).
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Runs the graph on a thread.
    ///
    /// A fresh thread initializes state from the schema defaults plus
    /// `input`. A thread with history loads its latest checkpoint first;
    /// a non-null `input` is merged on top (a new conversational turn), a
    /// null input resumes pending work left by an interrupt.
    #[tracing::instrument(skip(self, input))]
    pub async fn invoke(&self, input: Value, thread_id: &str) -> Result<InvokeOutcome> {
        self.run(input, thread_id, None).await
    }

    /// Runs the graph from a historical checkpoint (time travel).
    ///
    /// The continuation appends new sequence numbers after the thread's
    /// current maximum; checkpoints `1..=seq` are never touched.
    #[tracing::instrument(skip(self, input))]
    pub async fn invoke_from(&self, input: Value, thread_id: &str, seq: u64) -> Result<InvokeOutcome> {
        self.run(input, thread_id, Some(seq)).await
    }

    /// Latest checkpoint of a thread, if any.
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        Ok(self.require_saver()?.get_latest(thread_id).await?)
    }

    /// Full checkpoint history of a thread, oldest first.
    pub async fn get_state_history(&self, thread_id: &str) -> Result<Vec<CheckpointTuple>> {
        let stream = self.require_saver()?.history(thread_id).await?;
        Ok(stream.try_collect().await?)
    }

    fn require_saver(&self) -> Result<&Arc<dyn CheckpointSaver>> {
        self.checkpointer
            .as_ref()
            .ok_or_else(|| GraphError::InvalidInput("no checkpointer configured".to_string()))
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn run(
        &self,
        input: Value,
        thread_id: &str,
        fork_seq: Option<u64>,
    ) -> Result<InvokeOutcome> {
        let lock = self.thread_lock(thread_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| GraphError::ThreadBusy(thread_id.to_string()))?;

        let input_is_null = input.is_null();
        let loaded = match (&self.checkpointer, fork_seq) {
            (Some(saver), Some(seq)) => Some(saver.get_at(thread_id, seq).await?),
            (Some(saver), None) => saver.get_latest(thread_id).await?,
            (None, Some(_)) => {
                return Err(GraphError::InvalidInput(
                    "resuming from a sequence number requires a checkpointer".to_string(),
                ))
            }
            (None, None) => None,
        };

        let mut last_seq = loaded.as_ref().map(|t| t.seq);
        let mut steps = loaded
            .as_ref()
            .and_then(|t| t.metadata.step)
            .map(|s| s + 1)
            .unwrap_or(0);
        let mut pending_fork = fork_seq;

        let (mut state, mut frontier, mut resuming, mut position_persisted) = match loaded {
            Some(tuple) => {
                let mut state = tuple.checkpoint.values;
                if !input_is_null {
                    state = self.schema.apply(state, input)?;
                }
                if tuple.checkpoint.next.is_empty() {
                    if input_is_null {
                        // Nothing pending and nothing new: the final state
                        // stands as-is.
                        return Ok(InvokeOutcome::Complete(state));
                    }
                    let frontier = self.resolve_next(START, &state)?;
                    (state, frontier, false, false)
                } else {
                    (state, tuple.checkpoint.next, true, input_is_null)
                }
            }
            None => {
                if input_is_null {
                    return Err(GraphError::InvalidInput(
                        "null input on a thread with no history".to_string(),
                    ));
                }
                let state = self.schema.initial(input)?;
                let frontier = self.resolve_next(START, &state)?;
                (state, frontier, false, false)
            }
        };

        loop {
            if frontier.is_empty() {
                tracing::info!(steps, "run complete");
                return Ok(InvokeOutcome::Complete(state));
            }

            if !resuming {
                if let Some(node) = frontier
                    .iter()
                    .find(|n| self.interrupt_before.contains(*n))
                    .cloned()
                {
                    if !position_persisted {
                        let source = if steps == 0 {
                            CheckpointSource::Input
                        } else {
                            CheckpointSource::Loop
                        };
                        last_seq = self
                            .persist(thread_id, &state, &frontier, &mut pending_fork, steps, source)
                            .await?;
                    }
                    tracing::info!(node = %node, "halting before node");
                    return Ok(InvokeOutcome::Interrupted(InterruptSignal {
                        node,
                        state,
                        seq: last_seq,
                    }));
                }
            }
            resuming = false;

            let batch = self.ordered_batch(&frontier);
            let combined = self.execute_batch(&batch, &state).await?;
            let grows_append = self.schema.touches_append(&combined);
            state = self.schema.apply(state, combined)?;

            let mut next = Vec::new();
            for node in &batch {
                for target in self.resolve_next(node, &state)? {
                    if !next.contains(&target) {
                        next.push(target);
                    }
                }
            }

            let halted_after = batch
                .iter()
                .find(|n| self.interrupt_after.contains(*n))
                .cloned();

            if grows_append || halted_after.is_some() || next.is_empty() {
                last_seq = self
                    .persist(
                        thread_id,
                        &state,
                        &next,
                        &mut pending_fork,
                        steps,
                        CheckpointSource::Loop,
                    )
                    .await?;
                position_persisted = true;
            } else {
                position_persisted = false;
            }
            steps += 1;
            frontier = next;

            if let Some(node) = halted_after {
                tracing::info!(node = %node, "halting after node");
                return Ok(InvokeOutcome::Interrupted(InterruptSignal {
                    node,
                    state,
                    seq: last_seq,
                }));
            }
        }
    }

    /// Runs one frontier batch and folds the partial updates, in
    /// registration order, into a single equivalent update.
    async fn execute_batch(&self, batch: &[String], state: &Value) -> Result<Value> {
        let futures = batch.iter().map(|name| {
            let executor = self.nodes.get(name).cloned();
            let name = name.clone();
            let state = state.clone();
            async move {
                let executor = executor.ok_or_else(|| {
                    GraphError::InvalidInput(format!("checkpoint references unknown node '{name}'"))
                })?;
                tracing::debug!(node = %name, "executing node");
                executor(state.clone())
                    .await
                    .map_err(|source| GraphError::NodeExecution {
                        node: name,
                        state,
                        source,
                    })
            }
        });

        let joined = join_all(futures);
        let results: Vec<Result<Value>> = match self.step_timeout {
            Some(timeout) => tokio::time::timeout(timeout, joined).await.map_err(|_| {
                GraphError::StepTimeout {
                    nodes: batch.to_vec(),
                    ms: timeout.as_millis() as u64,
                }
            })?,
            None => joined.await,
        };

        let mut combined = Value::Null;
        for result in results {
            combined = self.schema.merge_updates(combined, result?)?;
        }
        Ok(combined)
    }

    /// Resolves the outgoing edges of `source` against the current state.
    /// `END` targets are dropped; an empty result terminates the run.
    fn resolve_next(&self, source: &str, state: &Value) -> Result<Vec<String>> {
        let mut next = Vec::new();
        if let Some(edges) = self.edges.get(source) {
            for edge in edges {
                let target = match edge {
                    Edge::Direct(target) => target.clone(),
                    Edge::Conditional { router, branches } => {
                        let label = router(state);
                        branches
                            .get(&label)
                            .cloned()
                            .ok_or_else(|| GraphError::Routing {
                                node: source.to_string(),
                                label,
                            })?
                    }
                };
                if target != END && !next.contains(&target) {
                    next.push(target);
                }
            }
        }
        Ok(next)
    }

    /// Stable execution order for a frontier: node registration order.
    fn ordered_batch(&self, frontier: &[String]) -> Vec<String> {
        let mut batch = frontier.to_vec();
        batch.sort_by_key(|name| {
            self.node_order
                .iter()
                .position(|n| n == name)
                .unwrap_or(usize::MAX)
        });
        batch
    }

    async fn persist(
        &self,
        thread_id: &str,
        state: &Value,
        next: &[String],
        pending_fork: &mut Option<u64>,
        step: u64,
        source: CheckpointSource,
    ) -> Result<Option<u64>> {
        let Some(saver) = self.checkpointer.as_ref() else {
            return Ok(None);
        };
        let metadata = match pending_fork.take() {
            Some(parent) => CheckpointMetadata::new(CheckpointSource::Fork)
                .with_step(step)
                .with_parent_seq(parent),
            None => CheckpointMetadata::new(source).with_step(step),
        };
        let checkpoint = Checkpoint::new(state.clone(), next.to_vec());
        let seq = saver.put(thread_id, checkpoint, metadata).await?;
        tracing::debug!(seq, next = ?next, "checkpoint persisted");
        Ok(Some(seq))
    }
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_order)
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("has_checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateGraph;
    use crate::graph::node_fn;
    use crate::state::{MergePolicy, StateSchema};
    use agentgraph_checkpoint::MemorySaver;
    use serde_json::json;

    fn counter_schema() -> StateSchema {
        StateSchema::new()
            .with_messages()
            .field("count", MergePolicy::Replace)
    }

    fn logging_node(tag: &'static str) -> NodeExecutor {
        node_fn(move |_: Value| async move { Ok(json!({"messages": [tag]})) })
    }

    #[tokio::test]
    async fn linear_graph_runs_to_completion() {
        let graph = StateGraph::new(counter_schema())
            .add_node("a", logging_node("a"))
            .add_node("b", logging_node("b"))
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge("b", END)
            .compile()
            .unwrap();
        let outcome = graph.invoke(json!({"messages": ["in"]}), "t").await.unwrap();
        let InvokeOutcome::Complete(state) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["in", "a", "b"]));
    }

    #[tokio::test]
    async fn node_error_carries_state_and_writes_no_checkpoint() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node(
                "boom",
                node_fn(|_: Value| async { Err::<Value, _>("kaput".into()) }),
            )
            .set_entry("boom")
            .add_edge("boom", END)
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        let err = graph
            .invoke(json!({"messages": ["in"]}), "t")
            .await
            .unwrap_err();
        let GraphError::NodeExecution { node, state, .. } = err else {
            panic!("expected NodeExecution");
        };
        assert_eq!(node, "boom");
        assert_eq!(state["messages"], json!(["in"]));
        assert_eq!(saver.count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fan_out_merges_in_registration_order() {
        let graph = StateGraph::new(counter_schema())
            .add_node("split", logging_node("split"))
            .add_node("left", logging_node("left"))
            .add_node("right", logging_node("right"))
            .set_entry("split")
            .add_edge("split", "left")
            .add_edge("split", "right")
            .add_edge("left", END)
            .add_edge("right", END)
            .compile()
            .unwrap();
        let outcome = graph.invoke(json!({"messages": []}), "t").await.unwrap();
        let InvokeOutcome::Complete(state) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["split", "left", "right"]));
    }

    #[tokio::test]
    async fn concurrent_invoke_on_one_thread_fails_fast() {
        let graph = Arc::new(
            StateGraph::new(counter_schema())
                .add_node(
                    "slow",
                    node_fn(|_: Value| async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(json!({"messages": ["slow"]}))
                    }),
                )
                .set_entry("slow")
                .add_edge("slow", END)
                .compile()
                .unwrap(),
        );
        let first = {
            let graph = graph.clone();
            tokio::spawn(async move { graph.invoke(json!({"messages": []}), "same").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = graph.invoke(json!({"messages": []}), "same").await;
        assert!(matches!(second, Err(GraphError::ThreadBusy(t)) if t == "same"));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn step_timeout_aborts_the_run() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node(
                "stuck",
                node_fn(|_: Value| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }),
            )
            .set_entry("stuck")
            .add_edge("stuck", END)
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone())
            .with_step_timeout(Duration::from_millis(20));
        let err = graph
            .invoke(json!({"messages": []}), "t")
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::StepTimeout { .. }));
        assert_eq!(saver.count("t").await.unwrap(), 0);
        // The lock is released; a second invoke is not ThreadBusy.
        let again = graph.invoke(json!({"messages": []}), "t").await;
        assert!(matches!(again, Err(GraphError::StepTimeout { .. })));
    }

    #[tokio::test]
    async fn undeclared_router_label_fails_without_checkpoint() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node("a", logging_node("a"))
            .set_entry("a")
            .add_conditional_edges(
                "a",
                Arc::new(|_: &Value| "nowhere".to_string()),
                HashMap::from([("somewhere".to_string(), END.to_string())]),
            )
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        let err = graph
            .invoke(json!({"messages": []}), "t")
            .await
            .unwrap_err();
        assert!(
            matches!(err, GraphError::Routing { node, label } if node == "a" && label == "nowhere")
        );
        assert_eq!(saver.count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn multi_turn_thread_accumulates_messages() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node("echo", logging_node("reply"))
            .set_entry("echo")
            .add_edge("echo", END)
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        graph.invoke(json!({"messages": ["q1"]}), "t").await.unwrap();
        let outcome = graph.invoke(json!({"messages": ["q2"]}), "t").await.unwrap();
        let InvokeOutcome::Complete(state) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["q1", "reply", "q2", "reply"]));
        assert_eq!(saver.count("t").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn interrupt_before_halts_then_resumes() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node("first", logging_node("first"))
            .add_node("gated", logging_node("gated"))
            .set_entry("first")
            .add_edge("first", "gated")
            .add_edge("gated", END)
            .interrupt_before(["gated"])
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        let outcome = graph.invoke(json!({"messages": []}), "t").await.unwrap();
        let InvokeOutcome::Interrupted(signal) = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(signal.node, "gated");
        assert_eq!(signal.state["messages"], json!(["first"]));
        let latest = saver.get_latest("t").await.unwrap().unwrap();
        assert_eq!(latest.checkpoint.next, vec!["gated".to_string()]);

        let resumed = graph.invoke(Value::Null, "t").await.unwrap();
        let InvokeOutcome::Complete(state) = resumed else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["first", "gated"]));
    }

    #[tokio::test]
    async fn interrupt_after_halts_with_completed_node() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node("watched", logging_node("watched"))
            .add_node("rest", logging_node("rest"))
            .set_entry("watched")
            .add_edge("watched", "rest")
            .add_edge("rest", END)
            .interrupt_after(["watched"])
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        let outcome = graph.invoke(json!({"messages": []}), "t").await.unwrap();
        let InvokeOutcome::Interrupted(signal) = outcome else {
            panic!("expected interrupt");
        };
        assert_eq!(signal.node, "watched");
        let resumed = graph.invoke(Value::Null, "t").await.unwrap();
        let InvokeOutcome::Complete(state) = resumed else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["watched", "rest"]));
    }

    #[tokio::test]
    async fn fork_from_history_never_mutates_existing_checkpoints() {
        let saver = Arc::new(MemorySaver::new());
        let graph = StateGraph::new(counter_schema())
            .add_node("a", logging_node("a"))
            .add_node("b", logging_node("b"))
            .set_entry("a")
            .add_edge("a", "b")
            .add_edge("b", END)
            .compile()
            .unwrap()
            .with_checkpointer(saver.clone());
        graph.invoke(json!({"messages": ["in"]}), "t").await.unwrap();
        let before = graph.get_state_history("t").await.unwrap();
        assert_eq!(before.len(), 2);

        // Fork from the first checkpoint with a different question.
        let outcome = graph
            .invoke_from(json!({"messages": ["fork-in"]}), "t", 1)
            .await
            .unwrap();
        let InvokeOutcome::Complete(state) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state["messages"], json!(["in", "a", "fork-in", "b"]));

        let after = graph.get_state_history("t").await.unwrap();
        assert!(after.len() > before.len());
        for (old, new) in before.iter().zip(after.iter()) {
            assert_eq!(old.seq, new.seq);
            assert_eq!(old.checkpoint.values, new.checkpoint.values);
        }
        let forked = &after[before.len()..];
        assert!(forked
            .iter()
            .any(|t| t.metadata.source == CheckpointSource::Fork));
    }

    #[tokio::test]
    async fn null_input_on_fresh_thread_is_invalid() {
        let graph = StateGraph::new(counter_schema())
            .add_node("a", logging_node("a"))
            .set_entry("a")
            .add_edge("a", END)
            .compile()
            .unwrap()
            .with_checkpointer(Arc::new(MemorySaver::new()));
        let err = graph.invoke(Value::Null, "empty").await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidInput(_)));
    }
}
