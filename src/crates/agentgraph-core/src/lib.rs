//! Core graph execution engine: typed state with merge policies, graph
//! definition and compilation, and a checkpointed executor with interrupt
//! points and per-thread locking.
//!
//! A graph is a set of async node functions joined by fixed or conditional
//! edges. Nodes receive the current state (a schema-constrained JSON object)
//! and return partial updates; the executor merges updates per field policy,
//! persists checkpoints through an attached
//! [`CheckpointSaver`](agentgraph_checkpoint::CheckpointSaver), and routes
//! until the graph reaches [`END`] or an interrupt point.
//!
//! # Example
//!
//! ```rust
//! use agentgraph_core::{node_fn, StateGraph, StateSchema, END};
//! use serde_json::{json, Value};
//!
//! let graph = StateGraph::new(StateSchema::new().with_messages())
//!     .add_node(
//!         "greet",
//!         node_fn(|_: Value| async { Ok(json!({"messages": ["hello"]})) }),
//!     )
//!     .set_entry("greet")
//!     .add_edge("greet", END)
//!     .compile()
//!     .unwrap();
//! # let _ = graph;
//! ```

pub mod builder;
pub mod error;
pub mod executor;
pub mod graph;
pub mod llm;
pub mod messages;
pub mod state;
pub mod tool;

pub use builder::StateGraph;
pub use error::{BoxError, GraphError, Result, StateError};
pub use executor::{CompiledGraph, InterruptSignal, InvokeOutcome};
pub use graph::{node_fn, Edge, NodeExecutor, NodeFuture, Router, END, START};
pub use llm::{CompletionError, CompletionModel};
pub use messages::{last_message, messages_from_state, Message, MessageRole, ToolCall};
pub use state::{FieldSpec, MergePolicy, StateSchema};
pub use tool::{Tool, ToolError, ToolRegistry};

pub use agentgraph_checkpoint as checkpoint;
