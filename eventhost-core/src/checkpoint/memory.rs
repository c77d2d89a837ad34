use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Checkpoint, Checkpointer};
use crate::error::{Error, Result};

const STORE_NAME: &str = "checkpoint";

/// In-memory [Checkpointer]. Clones and [InMemoryCheckpointer::with_owner] share the table.
#[derive(Clone)]
pub struct InMemoryCheckpointer {
    checkpoints: Arc<Mutex<Option<HashMap<String, Checkpoint>>>>,
    owner: String,
}

impl InMemoryCheckpointer {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            checkpoints: Arc::new(Mutex::new(None)),
            owner: owner.into(),
        }
    }

    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            checkpoints: Arc::clone(&self.checkpoints),
            owner: owner.into(),
        }
    }

    fn with_checkpoints<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Checkpoint>) -> Result<T>,
    ) -> Result<T> {
        let mut checkpoints = self.checkpoints.lock();
        match checkpoints.as_mut() {
            Some(checkpoints) => f(checkpoints),
            None => Err(Error::StoreNotInitialized(STORE_NAME.to_string())),
        }
    }
}

impl Checkpointer for InMemoryCheckpointer {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn store_exists(&self, _cancel: CancellationToken) -> Result<bool> {
        Ok(self.checkpoints.lock().is_some())
    }

    async fn ensure_store(&self, _cancel: CancellationToken) -> Result<()> {
        self.checkpoints.lock().get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn delete_store(&self, _cancel: CancellationToken) -> Result<()> {
        self.checkpoints.lock().take();
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<Option<Checkpoint>> {
        self.with_checkpoints(|checkpoints| Ok(checkpoints.get(partition_id).cloned()))
    }

    async fn ensure_checkpoint(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<Checkpoint> {
        self.with_checkpoints(|checkpoints| {
            Ok(checkpoints
                .entry(partition_id.to_string())
                .or_insert_with(|| Checkpoint::start_of_stream(partition_id))
                .clone())
        })
    }

    async fn update_checkpoint(
        &self,
        partition_id: &str,
        checkpoint: &Checkpoint,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.with_checkpoints(|checkpoints| {
            let stored = checkpoints
                .get_mut(partition_id)
                .ok_or_else(|| Error::NotFound(partition_id.to_string()))?;
            *stored = checkpoint.for_partition(partition_id);
            Ok(())
        })?;

        debug!(
            partition_id,
            owner = %self.owner,
            sequence_number = checkpoint.sequence_number,
            offset = %checkpoint.offset,
            "Updated checkpoint"
        );
        Ok(())
    }

    async fn delete_checkpoint(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.with_checkpoints(|checkpoints| {
            checkpoints.remove(partition_id);
            Ok(())
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
