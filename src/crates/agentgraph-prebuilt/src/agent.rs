//! Prebuilt agent ⇄ tools loop.
//!
//! `create_agent` wires the canonical tool-using agent graph: the agent
//! node calls the completion model, a router sends tool requests to the
//! dispatcher, and tool responses loop back to the agent until it answers
//! without requesting tools.

use std::collections::HashMap;
use std::sync::Arc;

use agentgraph_checkpoint::CheckpointSaver;
use agentgraph_core::{
    messages_from_state, node_fn, CompiledGraph, CompletionModel, MergePolicy, Message,
    MessageRole, Result, StateGraph, StateSchema, ToolRegistry, END,
};
use serde_json::{json, Value};

use crate::tool_node::{ToolNode, PENDING_TOOL_CALLS};

/// Name of the model-calling node.
pub const AGENT_NODE: &str = "agent";

/// Name of the tool-dispatch node.
pub const TOOLS_NODE: &str = "tools";

/// Configuration for [`create_agent`].
#[derive(Clone)]
pub struct AgentConfig {
    system_prompt: Option<String>,
    parallel_tools: bool,
    interrupt_before_tools: bool,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self {
            system_prompt: None,
            parallel_tools: true,
            interrupt_before_tools: false,
            checkpointer: None,
        }
    }

    /// System prompt prepended to the conversation when it does not already
    /// carry one.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    /// Halt for human approval before any tool runs. Resume with a null
    /// input on the same thread.
    pub fn with_interrupt_before_tools(mut self, interrupt: bool) -> Self {
        self.interrupt_before_tools = interrupt;
        self
    }

    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }
}

/// Builds the agent ⇄ tools loop:
/// `START → agent —(should_continue)→ {tools | END}`, `tools → agent`.
pub fn create_agent(
    model: Arc<dyn CompletionModel>,
    tools: ToolRegistry,
    config: AgentConfig,
) -> Result<CompiledGraph> {
    let schema = StateSchema::new()
        .with_messages()
        .field_with_default(PENDING_TOOL_CALLS, MergePolicy::Replace, json!([]));

    let system_prompt = config.system_prompt.clone();
    let agent = node_fn(move |state: Value| {
        let model = model.clone();
        let system_prompt = system_prompt.clone();
        async move {
            let mut conversation = messages_from_state(&state)?;
            if let Some(prompt) = system_prompt {
                let has_system = conversation
                    .iter()
                    .any(|m| m.role == MessageRole::System);
                if !has_system {
                    conversation.insert(0, Message::system(prompt));
                }
            }
            let reply = model.complete(&conversation).await?;
            if reply.has_tool_calls() {
                let calls = reply.tool_calls.unwrap_or_default();
                tracing::debug!(count = calls.len(), "model requested tool calls");
                Ok(json!({ PENDING_TOOL_CALLS: calls }))
            } else {
                Ok(json!({ "messages": [reply] }))
            }
        }
    });

    let tool_node = ToolNode::new(tools).with_parallel(config.parallel_tools);

    let should_continue = Arc::new(|state: &Value| {
        let pending = state
            .get(PENDING_TOOL_CALLS)
            .and_then(Value::as_array)
            .map(|calls| !calls.is_empty())
            .unwrap_or(false);
        if pending { TOOLS_NODE } else { "end" }.to_string()
    });

    let mut graph = StateGraph::new(schema)
        .add_node(AGENT_NODE, agent)
        .add_node(TOOLS_NODE, tool_node.into_executor())
        .set_entry(AGENT_NODE)
        .add_conditional_edges(
            AGENT_NODE,
            should_continue,
            HashMap::from([
                (TOOLS_NODE.to_string(), TOOLS_NODE.to_string()),
                ("end".to_string(), END.to_string()),
            ]),
        )
        .add_edge(TOOLS_NODE, AGENT_NODE);

    if config.interrupt_before_tools {
        graph = graph.interrupt_before([TOOLS_NODE]);
    }

    let mut compiled = graph.compile()?;
    if let Some(saver) = config.checkpointer {
        compiled = compiled.with_checkpointer(saver);
    }
    Ok(compiled)
}
