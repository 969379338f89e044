//! Checkpoint data structures
//!
//! A [`Checkpoint`] is an immutable snapshot of graph state taken after a
//! completed execution step: the merged state values, the position the
//! executor will run next, and a creation timestamp. Checkpoints belong to a
//! *thread* (a logical conversation/session identified by an opaque string
//! id) and are keyed within that thread by a store-assigned, monotonically
//! increasing sequence number.
//!
//! The sequence number deliberately lives outside the checkpoint body: it is
//! an ownership fact of the store, assigned at `put` time, which is what
//! makes the history append-only even when execution forks from a historical
//! snapshot.
//!
//! # Example
//!
//! ```rust
//! use agentgraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};
//! use serde_json::json;
//!
//! let checkpoint = Checkpoint::new(
//!     json!({"messages": [{"role": "human", "content": "hi"}]}),
//!     vec!["agent".to_string()],
//! );
//! let metadata = CheckpointMetadata::new(CheckpointSource::Loop).with_step(0);
//!
//! assert_eq!(checkpoint.next, vec!["agent"]);
//! assert_eq!(metadata.step, Some(0));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Written for the caller's input before any node ran
    Input,
    /// Written by the executor loop after a completed step
    Loop,
    /// First checkpoint of a continuation resumed from a historical sequence
    Fork,
}

/// Metadata stored alongside a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// The source of the checkpoint
    pub source: CheckpointSource,

    /// Executor step counter within the invocation that wrote this checkpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,

    /// For `Fork` checkpoints, the historical sequence number resumed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_seq: Option<u64>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource) -> Self {
        Self {
            source,
            step: None,
            parent_seq: None,
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_parent_seq(mut self, parent_seq: u64) -> Self {
        self.parent_seq = Some(parent_seq);
        self
    }
}

/// Immutable state snapshot taken after a completed execution step
///
/// The `values` field is the full merged state object (not a delta) so that
/// loading a checkpoint is sufficient to resume execution without replay.
/// `next` names the node(s) the executor is about to run; an empty `next`
/// means the graph reached a terminal marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier of this snapshot
    pub id: String,

    /// Creation timestamp
    pub ts: DateTime<Utc>,

    /// Full state values at the time of the snapshot
    pub values: Value,

    /// Pending position: the node name(s) to execute next, empty when done
    pub next: Vec<String>,
}

impl Checkpoint {
    /// Create a checkpoint from merged state values and the pending position
    pub fn new(values: Value, next: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            next,
        }
    }

    /// Whether this checkpoint marks a completed execution
    pub fn is_terminal(&self) -> bool {
        self.next.is_empty()
    }
}

/// A stored checkpoint together with its store-assigned identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    /// Owning thread id
    pub thread_id: String,

    /// Store-assigned sequence number, starting at 1 per thread
    pub seq: u64,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Metadata recorded at save time
    pub metadata: CheckpointMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_checkpoint_creation() {
        let cp = Checkpoint::new(json!({"messages": []}), vec!["agent".to_string()]);
        assert!(!cp.id.is_empty());
        assert!(!cp.is_terminal());

        let done = Checkpoint::new(json!({"messages": []}), vec![]);
        assert!(done.is_terminal());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let cp = Checkpoint::new(
            json!({"messages": [{"role": "human", "content": "a"}, {"role": "assistant", "content": "b"}]}),
            vec!["tools".to_string()],
        );
        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, cp.id);
        assert_eq!(decoded.values, cp.values);
        assert_eq!(decoded.next, cp.next);
    }

    #[test]
    fn test_metadata_builders() {
        let m = CheckpointMetadata::new(CheckpointSource::Fork)
            .with_step(3)
            .with_parent_seq(2);
        assert_eq!(m.source, CheckpointSource::Fork);
        assert_eq!(m.step, Some(3));
        assert_eq!(m.parent_seq, Some(2));
    }
}
