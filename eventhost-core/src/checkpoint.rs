//! Per-partition consumption progress.
//!
//! A [Checkpoint] is the last position the owning host committed to having processed. Only the
//! owner of the partition's lease should advance it, which the processor host enforces before
//! calling [Checkpointer::update_checkpoint].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// In-process reference engine.
pub mod memory;

/// Engine on top of a revisioned KV bucket.
pub mod kv;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partition_id: String,
    pub sequence_number: i64,
    /// Opaque stream cursor, empty at the beginning of the stream.
    pub offset: String,
    pub enqueued_time_utc: DateTime<Utc>,
}

impl Checkpoint {
    /// Sentinel for a partition that has never been processed.
    pub fn start_of_stream(partition_id: impl Into<String>) -> Self {
        Checkpoint {
            partition_id: partition_id.into(),
            sequence_number: 0,
            offset: String::new(),
            // unix epoch
            enqueued_time_utc: DateTime::default(),
        }
    }

    pub fn is_start_of_stream(&self) -> bool {
        self.sequence_number == 0 && self.offset.is_empty()
    }

    /// The proposed position stored under `partition_id`, whatever partition it names itself.
    pub(crate) fn for_partition(&self, partition_id: &str) -> Self {
        Checkpoint {
            partition_id: partition_id.to_string(),
            ..self.clone()
        }
    }
}

/// Checkpointer manages the checkpoint store of one host identity.
#[trait_variant::make(Send)]
pub trait Checkpointer: Clone + Send + Sync + 'static {
    fn owner(&self) -> &str;

    async fn store_exists(&self, cancel: CancellationToken) -> Result<bool>;

    /// Initializes the store. Idempotent.
    async fn ensure_store(&self, cancel: CancellationToken) -> Result<()>;

    /// Wipes the store with all its checkpoints. Idempotent.
    async fn delete_store(&self, cancel: CancellationToken) -> Result<()>;

    /// The stored checkpoint, `None` for an unknown partition.
    async fn get_checkpoint(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<Option<Checkpoint>>;

    /// Creates the start-of-stream sentinel if there is no checkpoint, otherwise returns the
    /// stored one untouched.
    async fn ensure_checkpoint(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<Checkpoint>;

    /// Stores the proposed sequence number, offset and enqueued time as the new position.
    /// Fails with `NotFound` if the partition was never ensured.
    async fn update_checkpoint(
        &self,
        partition_id: &str,
        checkpoint: &Checkpoint,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Removes the partition's checkpoint. Idempotent.
    async fn delete_checkpoint(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
