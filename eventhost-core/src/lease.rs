//! Partition leases: time-bounded ownership claims fenced by an epoch.
//!
//! A [Lease] is a plain record. Every state change goes through the pure functions in
//! [transition] and is applied by a [Leaser] engine inside its own critical section (a lock for
//! [memory::InMemoryLeaser], a compare-and-set on the entry revision for [kv::KVLeaser]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Pure lease state transitions shared by all the engines.
pub mod transition;

/// In-process reference engine.
pub mod memory;

/// Engine on top of a revisioned KV bucket, safe across processes.
pub mod kv;

pub use transition::is_available;

/// Ownership record of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub partition_id: String,
    /// Host identity of the owner, empty when unowned.
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    /// Fencing token, incremented on every acquisition and every [Leaser::update_lease].
    pub epoch: u64,
}

impl Lease {
    /// An unowned lease that has never been acquired.
    pub fn new(partition_id: impl Into<String>) -> Self {
        Lease {
            partition_id: partition_id.into(),
            owner: String::new(),
            // unix epoch, long expired
            expires_at: DateTime::default(),
            epoch: 0,
        }
    }
}

/// Leaser manages the lease store of one host identity. All hosts competing for the same
/// partitions must share the backing store.
///
/// Contention outcomes (lost acquisition, renew or release by a non-owner, expired lease) are
/// reported with `false`. Errors are reserved for sequencing mistakes (`NotFound`, uninitialized
/// store), cancellation and backend failures.
#[trait_variant::make(Send)]
pub trait Leaser: Clone + Send + Sync + 'static {
    /// Host identity this leaser acquires leases for.
    fn owner(&self) -> &str;

    async fn store_exists(&self, cancel: CancellationToken) -> Result<bool>;

    /// Initializes the store. Idempotent.
    async fn ensure_store(&self, cancel: CancellationToken) -> Result<()>;

    /// Wipes the store with all its leases. Idempotent.
    async fn delete_store(&self, cancel: CancellationToken) -> Result<()>;

    /// Snapshot of every tracked lease, in no particular order.
    async fn get_leases(&self, cancel: CancellationToken) -> Result<Vec<Lease>>;

    /// Creates an unowned lease for the partition if there is none, otherwise returns the current
    /// one untouched.
    async fn ensure_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<Lease>;

    /// Removes the partition's lease. Idempotent.
    async fn delete_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<()>;

    /// Takes ownership if the lease is unowned or expired, extending the expiration by the lease
    /// duration and incrementing the epoch. Otherwise returns the current lease and `false`.
    async fn acquire_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)>;

    /// Extends the expiration if this host owns the lease and it has not expired yet.
    async fn renew_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)>;

    /// Gives up a held lease, making the partition available immediately.
    async fn release_lease(&self, partition_id: &str, cancel: CancellationToken) -> Result<bool>;

    /// Renews the lease and increments its epoch in one step, publishing a fresh fencing token.
    async fn update_lease(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<(Lease, bool)>;

    async fn close(&self) -> Result<()>;
}
