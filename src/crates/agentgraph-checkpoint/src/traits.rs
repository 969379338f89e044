//! Extensible checkpoint storage trait for custom backend implementations
//!
//! This module defines [`CheckpointSaver`], the abstraction the graph
//! executor persists through. The trait enables integration with any keyed
//! storage system (a database, an object store, a local directory) while
//! keeping one contract:
//!
//! - **Append-only** — `put` assigns the next sequence number for the thread
//!   and never overwrites an existing one. Resuming from a historical
//!   checkpoint forks forward as new sequence numbers; the old branch stays
//!   queryable for audit and time travel.
//! - **Thread isolation** — every thread id owns an independent, ordered
//!   history. Concurrent writes to distinct threads must be safe.
//! - **Exact round-trip** — stored state values must deserialize to exactly
//!   what was saved, including ordered message sequences.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use agentgraph_checkpoint::{
//!     Checkpoint, CheckpointMetadata, CheckpointSaver, CheckpointStream, CheckpointTuple,
//! };
//! use async_trait::async_trait;
//!
//! struct SqlSaver { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointSaver for SqlSaver {
//!     async fn put(
//!         &self,
//!         thread_id: &str,
//!         checkpoint: Checkpoint,
//!         metadata: CheckpointMetadata,
//!     ) -> agentgraph_checkpoint::Result<u64> {
//!         // INSERT .. seq = 1 + COALESCE(MAX(seq), 0) inside one transaction
//!         # unimplemented!()
//!     }
//!     // ... remaining methods query by (thread_id, seq) ...
//!     # async fn get_latest(&self, _: &str) -> agentgraph_checkpoint::Result<Option<CheckpointTuple>> { unimplemented!() }
//!     # async fn get_at(&self, _: &str, _: u64) -> agentgraph_checkpoint::Result<CheckpointTuple> { unimplemented!() }
//!     # async fn history(&self, _: &str) -> agentgraph_checkpoint::Result<CheckpointStream> { unimplemented!() }
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Async stream of checkpoint tuples, oldest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Storage backend contract for checkpoint persistence
///
/// Implementations must be `Send + Sync` and safe under concurrent use:
/// reads may race with appends to other threads, and two appends to distinct
/// thread ids must not interfere. (The executor serializes appends *within*
/// one thread id via its execution lock; the store does not need to.)
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a checkpoint to the thread's history
    ///
    /// The store assigns the next sequence number (starting at 1) and
    /// returns it. Prior sequence numbers are never overwritten, including
    /// when the caller is continuing from a historical checkpoint.
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<u64>;

    /// Fetch the highest-sequence checkpoint for a thread, if any
    async fn get_latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>>;

    /// Fetch the checkpoint at an exact sequence number
    ///
    /// Returns [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// when the thread or sequence number does not exist.
    async fn get_at(&self, thread_id: &str, seq: u64) -> Result<CheckpointTuple>;

    /// Stream the thread's full history, oldest first
    ///
    /// Each call re-reads the store, so the stream is restartable; entries
    /// already returned by a prior call are never reordered or dropped by a
    /// later one.
    async fn history(&self, thread_id: &str) -> Result<CheckpointStream>;

    /// Number of checkpoints persisted for a thread
    async fn count(&self, thread_id: &str) -> Result<u64> {
        use futures::StreamExt;
        let mut stream = self.history(thread_id).await?;
        let mut n = 0;
        while let Some(entry) = stream.next().await {
            entry?;
            n += 1;
        }
        Ok(n)
    }
}
