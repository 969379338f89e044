//! File-backed durable checkpoint storage
//!
//! [`FileSaver`] persists each checkpoint as one JSON file under a directory
//! per thread:
//!
//! ```text
//! <root>/
//!   <thread_id>/
//!     00000000000000000001.json
//!     00000000000000000002.json
//! ```
//!
//! Sequence numbers are zero-padded so lexicographic directory order equals
//! numeric order. Writes go to a temporary file in the same directory and
//! are renamed into place, so a crash mid-write never leaves a truncated
//! checkpoint visible. Files are never rewritten once placed, which gives
//! the same append-only guarantee as [`MemorySaver`](crate::MemorySaver)
//! plus durability across process restarts.
//!
//! Thread ids become directory names, so ids containing path separators or
//! traversal components are rejected rather than escaped.

use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use crate::traits::{CheckpointSaver, CheckpointStream};
use async_trait::async_trait;
use futures::stream;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Durable checkpoint saver writing one JSON file per checkpoint
#[derive(Debug)]
pub struct FileSaver {
    root: PathBuf,
    /// Serializes sequence assignment across tasks sharing this saver.
    put_lock: Mutex<()>,
}

/// On-disk record: the tuple minus the thread id, which the path encodes
#[derive(serde::Serialize, serde::Deserialize)]
struct FileRecord {
    seq: u64,
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

impl FileSaver {
    /// Create a saver rooted at the given directory, creating it if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            put_lock: Mutex::new(()),
        })
    }

    /// Root directory this saver writes under
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf> {
        if thread_id.is_empty()
            || thread_id.contains(['/', '\\'])
            || thread_id == "."
            || thread_id == ".."
        {
            return Err(CheckpointError::Invalid(format!(
                "thread id '{thread_id}' is not usable as a directory name"
            )));
        }
        Ok(self.root.join(thread_id))
    }

    fn seq_path(dir: &Path, seq: u64) -> PathBuf {
        // Zero-padded so lexicographic order equals numeric order.
        dir.join(format!("{seq:020}.json"))
    }

    async fn max_seq(dir: &Path) -> Result<u64> {
        let mut max = 0;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = parse_seq(&entry.file_name()) {
                max = max.max(seq);
            }
        }
        Ok(max)
    }

    async fn read_record(&self, thread_id: &str, path: &Path) -> Result<CheckpointTuple> {
        let bytes = tokio::fs::read(path).await?;
        let record: FileRecord = serde_json::from_slice(&bytes)?;
        Ok(CheckpointTuple {
            thread_id: thread_id.to_string(),
            seq: record.seq,
            checkpoint: record.checkpoint,
            metadata: record.metadata,
        })
    }
}

fn parse_seq(name: &std::ffi::OsStr) -> Option<u64> {
    let name = name.to_str()?;
    name.strip_suffix(".json")?.parse().ok()
}

#[async_trait]
impl CheckpointSaver for FileSaver {
    async fn put(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<u64> {
        let dir = self.thread_dir(thread_id)?;

        let _guard = self.put_lock.lock().await;
        tokio::fs::create_dir_all(&dir).await?;
        let seq = Self::max_seq(&dir).await? + 1;

        let record = FileRecord {
            seq,
            checkpoint,
            metadata,
        };
        let bytes = serde_json::to_vec(&record)?;

        // Write-then-rename keeps partially written files invisible.
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, Self::seq_path(&dir, seq)).await?;

        tracing::debug!(thread_id, seq, "checkpoint written to disk");
        Ok(seq)
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>> {
        let dir = self.thread_dir(thread_id)?;
        let seq = Self::max_seq(&dir).await?;
        if seq == 0 {
            return Ok(None);
        }
        self.read_record(thread_id, &Self::seq_path(&dir, seq))
            .await
            .map(Some)
    }

    async fn get_at(&self, thread_id: &str, seq: u64) -> Result<CheckpointTuple> {
        let dir = self.thread_dir(thread_id)?;
        let path = Self::seq_path(&dir, seq);
        match self.read_record(thread_id, &path).await {
            Ok(tuple) => Ok(tuple),
            Err(CheckpointError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CheckpointError::NotFound {
                    thread_id: thread_id.to_string(),
                    seq,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn history(&self, thread_id: &str) -> Result<CheckpointStream> {
        let dir = self.thread_dir(thread_id)?;
        let mut seqs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Box::pin(stream::iter(Vec::new())));
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = parse_seq(&entry.file_name()) {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();

        let mut results = Vec::with_capacity(seqs.len());
        for seq in seqs {
            results.push(self.read_record(thread_id, &Self::seq_path(&dir, seq)).await);
        }
        Ok(Box::pin(stream::iter(results)))
    }
}
