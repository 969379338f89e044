//! Completion-model capability.
//!
//! The engine consumes this trait and never implements a concrete provider.
//! Tests drive graphs with scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::Message;

/// Errors a completion backend may surface.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A chat-completion backend. Given the conversation so far, produce the
/// next assistant message, which may carry tool calls.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<Message, CompletionError>;
}
