//! In-memory checkpoint storage
//!
//! [`MemorySaver`] is the volatile reference implementation of
//! [`CheckpointSaver`]: a `RwLock`-guarded map of thread id to an ordered
//! vector of entries. Checkpoints survive for the life of the process only,
//! which is exactly what interactive sessions and tests need. For durability
//! across restarts use [`FileSaver`](crate::file::FileSaver) instead — the
//! two are interchangeable behind the trait.
//!
//! ```rust
//! use agentgraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSaver,
//!     CheckpointSource, MemorySaver};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = MemorySaver::new();
//! let seq = saver
//!     .put(
//!         "t1",
//!         Checkpoint::new(json!({"messages": []}), vec!["agent".into()]),
//!         CheckpointMetadata::new(CheckpointSource::Loop),
//!     )
//!     .await?;
//! assert_eq!(seq, 1);
//! assert!(saver.get_latest("t1").await?.is_some());
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointSaver, CheckpointStream};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type ThreadHistory = Vec<CheckpointTuple>;

/// Volatile, process-local checkpoint saver
#[derive(Debug, Clone, Default)]
pub struct MemorySaver {
    storage: Arc<RwLock<HashMap<String, ThreadHistory>>>,
}

impl MemorySaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Drop all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for MemorySaver {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let history = storage.entry(thread_id.to_string()).or_default();
        let seq = history.last().map(|e| e.seq).unwrap_or(0) + 1;

        history.push(CheckpointTuple {
            thread_id: thread_id.to_string(),
            seq,
            checkpoint,
            metadata,
        });

        tracing::debug!(thread_id, seq, "checkpoint saved");
        Ok(seq)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).and_then(|h| h.last()).cloned())
    }

    async fn get_at(&self, thread_id: &str, seq: u64) -> Result<CheckpointTuple> {
        let storage = self.storage.read().await;
        storage
            .get(thread_id)
            .and_then(|h| h.iter().find(|e| e.seq == seq))
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound {
                thread_id: thread_id.to_string(),
                seq,
            })
    }

    async fn history(&self, thread_id: &str) -> Result<CheckpointStream> {
        let storage = self.storage.read().await;
        let entries: Vec<Result<CheckpointTuple>> = storage
            .get(thread_id)
            .map(|h| h.iter().cloned().map(Ok).collect())
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(entries)))
    }

    async fn count(&self, thread_id: &str) -> Result<u64> {
        let storage = self.storage.read().await;
        Ok(storage.get(thread_id).map(|h| h.len() as u64).unwrap_or(0))
    }
}
