//! # agentgraph-checkpoint
//!
//! Checkpoint persistence for agentgraph execution threads.
//!
//! The graph executor snapshots state after every completed step; this crate
//! owns the snapshot data model and the pluggable storage contract:
//!
//! - [`Checkpoint`] / [`CheckpointTuple`] — an immutable state snapshot plus
//!   its store-assigned `(thread_id, seq)` identity
//! - [`CheckpointSaver`] — the append-only storage trait
//! - [`MemorySaver`] — volatile in-process backend
//! - [`FileSaver`] — durable one-file-per-checkpoint backend
//!
//! Histories are strictly append-only per thread: resuming from a historical
//! sequence number forks forward as new sequence numbers, so earlier
//! branches stay intact for audit and time-travel inspection.
//!
//! ```rust
//! use agentgraph_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSaver,
//!     CheckpointSource, MemorySaver};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = MemorySaver::new();
//! let checkpoint = Checkpoint::new(json!({"messages": []}), vec!["agent".into()]);
//! let seq = saver
//!     .put("thread-1", checkpoint, CheckpointMetadata::new(CheckpointSource::Input))
//!     .await?;
//! assert_eq!(seq, 1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointTuple};
pub use error::{CheckpointError, Result};
pub use file::FileSaver;
pub use memory::MemorySaver;
pub use traits::{CheckpointSaver, CheckpointStream};
