//! Leases stored as JSON documents in a revisioned KV bucket, one key per partition.
//!
//! Every transition reads the entry, applies the [transition](super::transition) function and
//! writes back with a compare-and-set on the revision it read. When another host wrote in
//! between, the entry is read again and the transition re-evaluated on the fresh lease, so a
//! decision is always made on the latest state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use eventhost_shared::kv::KVStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Lease, Leaser, transition};
use crate::error::{Error, Result};
use crate::shared::{MAX_CAS_ATTEMPTS, cancellable, decode, encode};

/// KVLeaser shares its bucket with every other host competing for the same partitions.
#[derive(Clone)]
pub struct KVLeaser {
    store: Arc<dyn KVStore>,
    owner: String,
    lease_duration: TimeDelta,
}

impl KVLeaser {
    pub fn new(store: Arc<dyn KVStore>, owner: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            store,
            owner: owner.into(),
            lease_duration: transition::lease_delta(lease_duration),
        }
    }

    async fn read(&self, partition_id: &str, cancel: &CancellationToken) -> Result<(Lease, u64)> {
        let entry = cancellable(cancel, self.store.entry(partition_id))
            .await?
            .ok_or_else(|| Error::NotFound(partition_id.to_string()))?;
        Ok((decode(&entry)?, entry.revision))
    }

    /// Compare-and-set loop around a transition. Returns the lease as written and `true`, or the
    /// latest lease and `false` when the transition is not allowed on it. A key that keeps
    /// changing fails with `Conflict`, the outcome is unknown to the caller.
    async fn transition(
        &self,
        partition_id: &str,
        cancel: &CancellationToken,
        apply: impl Fn(&Lease, DateTime<Utc>) -> Option<Lease> + Send,
    ) -> Result<(Lease, bool)> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (current, revision) = self.read(partition_id, cancel).await?;
            let Some(next) = apply(&current, Utc::now()) else {
                return Ok((current, false));
            };

            let written = cancellable(
                cancel,
                self.store.update(partition_id, encode(&next)?, revision),
            )
            .await?;
            if written.is_some() {
                return Ok((next, true));
            }

            debug!(partition_id, attempt, revision, "Lease changed concurrently, retrying");
        }

        warn!(partition_id, owner = %self.owner, "Giving up on lease after repeated conflicts");
        Err(Error::Conflict(partition_id.to_string()))
    }
}

impl Leaser for KVLeaser {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn store_exists(&self, cancel: CancellationToken) -> Result<bool> {
        cancellable(&cancel, self.store.bucket_exists()).await
    }

    async fn ensure_store(&self, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.ensure_bucket()).await?;
        info!(bucket = self.store.name(), "Lease store is ready");
        Ok(())
    }

    async fn delete_store(&self, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.delete_bucket()).await?;
        info!(bucket = self.store.name(), "Deleted lease store");
        Ok(())
    }

    async fn get_leases(&self, cancel: CancellationToken) -> Result<Vec<Lease>> {
        let keys = cancellable(&cancel, self.store.keys()).await?;
        let mut leases = Vec::with_capacity(keys.len());
        for key in keys {
            // deleted between listing and reading
            if let Some(entry) = cancellable(&cancel, self.store.entry(&key)).await? {
                leases.push(decode(&entry)?);
            }
        }
        Ok(leases)
    }

    async fn ensure_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<Lease> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some(entry) = cancellable(&cancel, self.store.entry(partition_id)).await? {
                return decode(&entry);
            }

            let lease = Lease::new(partition_id);
            if cancellable(&cancel, self.store.create(partition_id, encode(&lease)?))
                .await?
                .is_some()
            {
                debug!(partition_id, "Created lease");
                return Ok(lease);
            }
            // created by another host in between, read theirs
        }
        Err(Error::Conflict(partition_id.to_string()))
    }

    async fn delete_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<()> {
        cancellable(&cancel, self.store.delete(partition_id)).await
    }

    async fn acquire_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        let outcome = self
            .transition(partition_id, &cancel, |lease, now| {
                transition::acquire(lease, &self.owner, now, self.lease_duration)
            })
            .await;
        // a contended partition is simply not ours this round
        let (lease, acquired) = match outcome {
            Err(Error::Conflict(_)) => (self.read(partition_id, &cancel).await?.0, false),
            outcome => outcome?,
        };

        if acquired {
            info!(partition_id, owner = %self.owner, epoch = lease.epoch, "Acquired lease");
        } else {
            debug!(partition_id, holder = %lease.owner, "Lease is held by another host");
        }
        Ok((lease, acquired))
    }

    async fn renew_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        self.transition(partition_id, &cancel, |lease, now| {
            transition::renew(lease, &self.owner, now, self.lease_duration)
        })
        .await
    }

    async fn release_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<bool> {
        let (_, released) = self
            .transition(partition_id, &cancel, |lease, now| {
                transition::release(lease, &self.owner, now)
            })
            .await?;

        if released {
            info!(partition_id, owner = %self.owner, "Released lease");
        }
        Ok(released)
    }

    async fn update_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        self.transition(partition_id, &cancel, |lease, now| {
            transition::update(lease, &self.owner, now, self.lease_duration)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
