use std::sync::Arc;

use eventhost_shared::kv::KVStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Checkpoint, Checkpointer};
use crate::error::{Error, Result};
use crate::shared::{MAX_CAS_ATTEMPTS, cancellable, decode, encode};

/// Checkpoints stored as JSON documents, one key per partition.
#[derive(Clone)]
pub struct KVCheckpointer {
    store: Arc<dyn KVStore>,
    owner: String,
}

impl KVCheckpointer {
    pub fn new(store: Arc<dyn KVStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }
}

impl Checkpointer for KVCheckpointer {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn store_exists(&self, cancel: CancellationToken) -> Result<bool> {
        cancellable(&cancel, self.store.bucket_exists()).await
    }

    async fn ensure_store(&self, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.ensure_bucket()).await?;
        info!(bucket = self.store.name(), "Checkpoint store is ready");
        Ok(())
    }

    async fn delete_store(&self, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.delete_bucket()).await?;
        info!(bucket = self.store.name(), "Deleted checkpoint store");
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<Option<Checkpoint>> {
        cancellable(&cancel, self.store.entry(partition_id))
            .await?
            .map(|entry| decode(&entry))
            .transpose()
    }

    async fn ensure_checkpoint(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<Checkpoint> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some(checkpoint) = self.get_checkpoint(partition_id, cancel.clone()).await? {
                return Ok(checkpoint);
            }

            let checkpoint = Checkpoint::start_of_stream(partition_id);
            if cancellable(
                &cancel,
                self.store.create(partition_id, encode(&checkpoint)?),
            )
            .await?
            .is_some()
            {
                return Ok(checkpoint);
            }
        }
        Err(Error::Conflict(partition_id.to_string()))
    }

    /// The write is conditional on the entry still existing at the revision read, so a
    /// checkpoint deleted concurrently is not brought back.
    async fn update_checkpoint(
        &self,
        partition_id: &str,
        checkpoint: &Checkpoint,
        cancel: CancellationToken,
    ) -> Result<()> {
        let value = encode(&checkpoint.for_partition(partition_id))?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let entry = cancellable(&cancel, self.store.entry(partition_id))
                .await?
                .ok_or_else(|| Error::NotFound(partition_id.to_string()))?;

            if cancellable(
                &cancel,
                self.store.update(partition_id, value.clone(), entry.revision),
            )
            .await?
            .is_some()
            {
                debug!(
                    partition_id,
                    owner = %self.owner,
                    sequence_number = checkpoint.sequence_number,
                    offset = %checkpoint.offset,
                    "Updated checkpoint"
                );
                return Ok(());
            }
            debug!(partition_id, attempt, "Checkpoint changed concurrently, retrying");
        }
        Err(Error::Conflict(partition_id.to_string()))
    }

    async fn delete_checkpoint(&self, partition_id: &str, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.delete(partition_id)).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
