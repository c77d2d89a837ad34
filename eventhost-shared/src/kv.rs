//! Generic revisioned Key-Value store trait for pluggable storage backends.
//!
//! Every write returns the new revision of the key, and conditional writes ([`KVStore::create`],
//! [`KVStore::update`]) are resolved atomically by the backend. This is what lets independent
//! processes agree on who holds a lease: the loser of a race observes a revision conflict instead
//! of silently overwriting the winner.
//!
//! The trait uses `async_trait` to stay object safe, so stores are passed around as
//! `Arc<dyn KVStore>`.

use async_trait::async_trait;
use bytes::Bytes;
use std::error::Error as StdError;
use thiserror::Error;

pub mod jetstream;

/// Error type for KV operations.
#[derive(Debug, Error)]
pub enum KVError {
    /// The bucket has not been created (or was deleted).
    #[error("KV bucket {0} does not exist")]
    BucketNotFound(String),

    /// Any failure reported by the backend.
    #[error("KV backend error - {0}")]
    Backend(Box<dyn StdError + Send + Sync + 'static>),
}

impl KVError {
    pub fn backend(err: impl StdError + Send + Sync + 'static) -> Self {
        KVError::Backend(Box::new(err))
    }
}

pub type KVResult<T> = Result<T, KVError>;

/// A live entry of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct KVEntry {
    pub key: String,
    pub value: Bytes,
    /// Revision of the last write to this key. Pass it back to [`KVStore::update`].
    pub revision: u64,
}

/// KVStore defines a revisioned key-value store with bucket lifecycle management.
#[async_trait]
pub trait KVStore: Send + Sync {
    /// Bucket name/identifier.
    fn name(&self) -> &str;

    /// Whether the bucket exists.
    async fn bucket_exists(&self) -> KVResult<bool>;

    /// Create the bucket if it does not exist yet. Idempotent.
    async fn ensure_bucket(&self) -> KVResult<()>;

    /// Delete the bucket with all its keys. Idempotent.
    async fn delete_bucket(&self) -> KVResult<()>;

    /// All live keys.
    async fn keys(&self) -> KVResult<Vec<String>>;

    /// The live entry for a key, `None` if the key was never written or has been deleted.
    async fn entry(&self, key: &str) -> KVResult<Option<KVEntry>>;

    /// Write `value` only if the key has no live entry.
    ///
    /// # Returns
    /// * `Ok(Some(revision))` - the key was created
    /// * `Ok(None)` - the key already exists, nothing was written
    async fn create(&self, key: &str, value: Bytes) -> KVResult<Option<u64>>;

    /// Write `value` only if the key's current revision is `revision` (compare-and-set).
    ///
    /// # Returns
    /// * `Ok(Some(revision))` - the new revision
    /// * `Ok(None)` - the key changed or disappeared since `revision`, nothing was written
    async fn update(&self, key: &str, value: Bytes, revision: u64) -> KVResult<Option<u64>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> KVResult<()>;
}
