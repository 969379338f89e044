//! Tool dispatch node.
//!
//! `ToolNode` turns a [`ToolRegistry`] into a graph node. Each step it
//! gathers the pending tool calls, executes every named tool, and appends
//! one tool-response message per call, in request order. An unknown tool
//! name fails the whole dispatch step before anything runs; a tool's own
//! failure is absorbed into its response message so the model can react
//! to it.

use std::sync::Arc;

use agentgraph_core::{
    last_message, node_fn, BoxError, GraphError, Message, NodeExecutor, Tool, ToolCall,
    ToolRegistry,
};
use futures::future::join_all;
use serde_json::{json, Value};

/// Name of the working-register field the agent node uses to hand tool
/// calls to the dispatcher.
pub const PENDING_TOOL_CALLS: &str = "pending_tool_calls";

/// A graph node that executes the tool calls pending in the state.
///
/// Calls are read from the `pending_tool_calls` register when present,
/// otherwise from the last assistant message's `tool_calls`.
#[derive(Clone)]
pub struct ToolNode {
    registry: ToolRegistry,
    parallel: bool,
}

impl ToolNode {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            parallel: true,
        }
    }

    /// Switches between concurrent and sequential execution. Results are
    /// appended in request order either way.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Wraps the dispatcher into a node executor.
    pub fn into_executor(self) -> NodeExecutor {
        let node = Arc::new(self);
        node_fn(move |state: Value| {
            let node = node.clone();
            async move { node.dispatch(state).await }
        })
    }

    async fn dispatch(&self, state: Value) -> Result<Value, BoxError> {
        let (calls, from_register) = pending_calls(&state)?;
        if calls.is_empty() {
            return Ok(Value::Null);
        }

        // Resolve every tool up front: an unknown name is fatal for the
        // whole dispatch step, before any tool runs.
        let mut resolved: Vec<(ToolCall, Arc<dyn Tool>)> = Vec::with_capacity(calls.len());
        for call in calls {
            let tool = self
                .registry
                .get(&call.name)
                .ok_or_else(|| GraphError::ToolNotFound(call.name.clone()))?;
            resolved.push((call, tool));
        }

        let messages = if self.parallel {
            let futures = resolved
                .into_iter()
                .map(|(call, tool)| async move { run_one(call, tool).await });
            join_all(futures).await
        } else {
            let mut out = Vec::new();
            for (call, tool) in resolved {
                out.push(run_one(call, tool).await);
            }
            out
        };

        if from_register {
            Ok(json!({ "messages": messages, PENDING_TOOL_CALLS: [] }))
        } else {
            Ok(json!({ "messages": messages }))
        }
    }
}

async fn run_one(call: ToolCall, tool: Arc<dyn Tool>) -> Message {
    tracing::debug!(tool = %call.name, "dispatching tool call");
    match tool.invoke(call.args.clone()).await {
        Ok(result) => Message::tool(render(result), call.id),
        Err(err) => Message::tool(format!("error: {err}"), call.id),
    }
}

fn render(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// The calls the dispatcher should execute, and whether they came from the
/// working register (which must then be cleared).
fn pending_calls(state: &Value) -> Result<(Vec<ToolCall>, bool), BoxError> {
    if let Some(raw) = state.get(PENDING_TOOL_CALLS) {
        if raw.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
            let calls: Vec<ToolCall> = serde_json::from_value(raw.clone())?;
            return Ok((calls, true));
        }
    }
    let calls = last_message(state)?
        .filter(Message::has_tool_calls)
        .and_then(|m| m.tool_calls)
        .unwrap_or_default();
    Ok((calls, false))
}
