//! Error types for graph construction and execution.

use agentgraph_checkpoint::CheckpointError;
use serde_json::Value;
use thiserror::Error;

/// Boxed error returned by node functions and routers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while validating or mutating state against a schema.
#[derive(Error, Debug)]
pub enum StateError {
    /// An update referenced a field the schema does not declare, or the
    /// update was not a JSON object.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The stored state itself is malformed (e.g. an append field that is
    /// not an array).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Errors raised by graph construction and execution.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Compilation found one or more structural problems. All violations
    /// discovered in a single pass are reported together.
    #[error("invalid graph definition: {}", .0.join("; "))]
    Definition(Vec<String>),

    /// A state update violated the schema.
    #[error(transparent)]
    State(#[from] StateError),

    /// A router returned a label that is not declared in its branch map.
    #[error("router for node '{node}' returned undeclared label '{label}'")]
    Routing { node: String, label: String },

    /// A node function returned an error. Carries the node name and the
    /// state the node was invoked with.
    #[error("node '{node}' failed: {source}")]
    NodeExecution {
        node: String,
        state: Value,
        #[source]
        source: BoxError,
    },

    /// A tool call named a tool that is not registered.
    #[error("tool '{0}' is not registered")]
    ToolNotFound(String),

    /// Another invocation is already running on the same thread.
    #[error("thread '{0}' is busy")]
    ThreadBusy(String),

    /// A step exceeded the configured timeout.
    #[error("step at node(s) {nodes:?} timed out after {ms}ms")]
    StepTimeout { nodes: Vec<String>, ms: u64 },

    /// The checkpoint store failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The caller supplied input the engine cannot act on.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias for graph results.
pub type Result<T> = std::result::Result<T, GraphError>;
