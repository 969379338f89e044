//! Prebuilt graphs for common agent shapes.
//!
//! The main entry point is [`create_agent`], which wires a completion model
//! and a tool registry into the canonical agent ⇄ tools loop with optional
//! checkpointing and a human-approval interrupt before tool execution.

pub mod agent;
pub mod tool_node;

pub use agent::{create_agent, AgentConfig, AGENT_NODE, TOOLS_NODE};
pub use tool_node::{ToolNode, PENDING_TOOL_CALLS};
