//! In-memory implementation of the [Leaser] trait for tests and single-process deployments.
//! The in-memory leaser gives no protection across processes, every host must live in this
//! process and share the same table (see [InMemoryLeaser::with_owner]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Lease, Leaser, transition};
use crate::error::{Error, Result};

const STORE_NAME: &str = "lease";

/// `None` until the store is ensured.
type LeaseTable = Option<HashMap<String, Lease>>;

/// InMemoryLeaser keeps all leases in one table behind a single lock. Every operation is a short
/// critical section, cancellation is never observed.
#[derive(Clone)]
pub struct InMemoryLeaser {
    leases: Arc<Mutex<LeaseTable>>,
    owner: String,
    lease_duration: TimeDelta,
}

impl InMemoryLeaser {
    pub fn new(owner: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            leases: Arc::new(Mutex::new(None)),
            owner: owner.into(),
            lease_duration: transition::lease_delta(lease_duration),
        }
    }

    /// A leaser for another host identity sharing this leaser's table.
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            leases: Arc::clone(&self.leases),
            owner: owner.into(),
            lease_duration: self.lease_duration,
        }
    }

    /// Runs `f` on the table under the lock, failing if the store is not initialized.
    fn with_leases<T>(&self, f: impl FnOnce(&mut HashMap<String, Lease>) -> Result<T>) -> Result<T> {
        let mut leases = self.leases.lock();
        match leases.as_mut() {
            Some(leases) => f(leases),
            None => Err(Error::StoreNotInitialized(STORE_NAME.to_string())),
        }
    }

    /// Applies a transition to an existing lease. Returns the new lease and `true` if the
    /// transition was allowed, otherwise the untouched lease and `false`.
    fn transition(
        &self,
        partition_id: &str,
        apply: impl FnOnce(&Lease) -> Option<Lease>,
    ) -> Result<(Lease, bool)> {
        self.with_leases(|leases| {
            let lease = leases
                .get_mut(partition_id)
                .ok_or_else(|| Error::NotFound(partition_id.to_string()))?;
            match apply(lease) {
                Some(next) => {
                    *lease = next;
                    Ok((lease.clone(), true))
                }
                None => Ok((lease.clone(), false)),
            }
        })
    }
}

impl Leaser for InMemoryLeaser {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn store_exists(&self, _cancel: CancellationToken) -> Result<bool> {
        Ok(self.leases.lock().is_some())
    }

    async fn ensure_store(&self, _cancel: CancellationToken) -> Result<()> {
        self.leases.lock().get_or_insert_with(HashMap::new);
        Ok(())
    }

    async fn delete_store(&self, _cancel: CancellationToken) -> Result<()> {
        self.leases.lock().take();
        Ok(())
    }

    async fn get_leases(&self, _cancel: CancellationToken) -> Result<Vec<Lease>> {
        self.with_leases(|leases| Ok(leases.values().cloned().collect()))
    }

    async fn ensure_lease(&self, partition_id: &str, _cancel: CancellationToken) -> Result<Lease> {
        self.with_leases(|leases| {
            Ok(leases
                .entry(partition_id.to_string())
                .or_insert_with(|| Lease::new(partition_id))
                .clone())
        })
    }

    async fn delete_lease(&self, partition_id: &str, _cancel: CancellationToken) -> Result<()> {
        self.with_leases(|leases| {
            leases.remove(partition_id);
            Ok(())
        })
    }

    async fn acquire_lease(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        let (lease, acquired) = self.transition(partition_id, |lease| {
            transition::acquire(lease, &self.owner, Utc::now(), self.lease_duration)
        })?;

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
        _cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        self.transition(partition_id, |lease| {
            transition::renew(lease, &self.owner, Utc::now(), self.lease_duration)
        })
    }

    async fn release_lease(&self, partition_id: &str, _cancel: CancellationToken) -> Result<bool> {
        let (_, released) = self.transition(partition_id, |lease| {
            transition::release(lease, &self.owner, Utc::now())
        })?;

        if released {
            info!(partition_id, owner = %self.owner, "Released lease");
        }
        Ok(released)
    }

    async fn update_lease(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<(Lease, bool)> {
        self.transition(partition_id, |lease| {
            transition::update(lease, &self.owner, Utc::now(), self.lease_duration)
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
