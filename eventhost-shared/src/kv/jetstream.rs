//! JetStream implementation of the KV store trait.
//!
//! JetStream KV keeps a per-key revision (the stream sequence of the last write) and resolves
//! `create`/`update` atomically on the server, so it gives the compare-and-set primitive that safe
//! cross-process lease acquisition needs.

use super::{KVEntry, KVError, KVResult, KVStore};
use std::error::Error as StdError;

use async_nats::jetstream;
use async_nats::jetstream::context::{
    GetStreamError, GetStreamErrorKind, KeyValueError, KeyValueErrorKind,
};
use async_nats::jetstream::kv::{Operation, Store};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use parking_lot::RwLock;
use tracing::{debug, info};

/// Only the latest value per key is needed, older revisions are never read.
const DEFAULT_HISTORY: i64 = 1;

/// JetStream KV Store implementation.
///
/// Holds the JetStream context so it can manage the bucket lifecycle, and caches the bucket handle
/// once the bucket is known to exist.
pub struct JetstreamKVStore {
    context: jetstream::Context,
    bucket: String,
    store: RwLock<Option<Store>>,
}

impl JetstreamKVStore {
    /// Create a new JetstreamKVStore for a bucket. The bucket is not created until
    /// [`KVStore::ensure_bucket`] is called.
    ///
    /// # Arguments
    /// * `context` - The JetStream context
    /// * `bucket` - The name of the KV bucket to use
    pub fn new(context: jetstream::Context, bucket: impl Into<String>) -> Self {
        Self {
            context,
            bucket: bucket.into(),
            store: RwLock::new(None),
        }
    }

    /// Returns the bucket handle, looking it up on the server if it is not cached yet.
    async fn store(&self) -> KVResult<Store> {
        if let Some(store) = self.store.read().as_ref() {
            return Ok(store.clone());
        }

        match self.context.get_key_value(self.bucket.as_str()).await {
            Ok(store) => {
                *self.store.write() = Some(store.clone());
                Ok(store)
            }
            Err(e) if is_bucket_not_found(&e) => {
                debug!(bucket = %self.bucket, "KV bucket does not exist");
                Err(KVError::BucketNotFound(self.bucket.clone()))
            }
            Err(e) => Err(KVError::backend(e)),
        }
    }

    /// Live entry from a raw JetStream entry, deletes and purges are tombstones.
    fn live_entry(entry: jetstream::kv::Entry) -> Option<KVEntry> {
        match entry.operation {
            Operation::Put => Some(KVEntry {
                key: entry.key,
                value: entry.value,
                revision: entry.revision,
            }),
            Operation::Delete | Operation::Purge => None,
        }
    }
}

/// Only a missing backing stream means a missing bucket. Timeouts and connection failures are
/// backend errors.
fn is_bucket_not_found(err: &KeyValueError) -> bool {
    if err.kind() != KeyValueErrorKind::GetBucket {
        return false;
    }
    err.source()
        .and_then(|source| source.downcast_ref::<GetStreamError>())
        .is_some_and(|source| {
            matches!(
                source.kind(),
                GetStreamErrorKind::JetStream(e) if e.error_code() == jetstream::ErrorCode::STREAM_NOT_FOUND
            )
        })
}

#[async_trait]
impl KVStore for JetstreamKVStore {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> KVResult<bool> {
        match self.store().await {
            Ok(_) => Ok(true),
            Err(KVError::BucketNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_bucket(&self) -> KVResult<()> {
        if self.bucket_exists().await? {
            return Ok(());
        }

        let created = self
            .context
            .create_key_value(jetstream::kv::Config {
                bucket: self.bucket.clone(),
                history: DEFAULT_HISTORY,
                ..Default::default()
            })
            .await;

        match created {
            Ok(store) => {
                info!(bucket = %self.bucket, "Created KV bucket");
                *self.store.write() = Some(store);
                Ok(())
            }
            // another process may have created it in the meantime
            Err(e) => self.store().await.map(|_| ()).map_err(|_| KVError::backend(e)),
        }
    }

    async fn delete_bucket(&self) -> KVResult<()> {
        self.store.write().take();
        match self.context.delete_key_value(self.bucket.as_str()).await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Deleted KV bucket");
                Ok(())
            }
            Err(e) => {
                if self.bucket_exists().await? {
                    Err(KVError::backend(e))
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn keys(&self) -> KVResult<Vec<String>> {
        self.store()
            .await?
            .keys()
            .await
            .map_err(KVError::backend)?
            .try_collect()
            .await
            .map_err(KVError::backend)
    }

    async fn entry(&self, key: &str) -> KVResult<Option<KVEntry>> {
        let entry = self
            .store()
            .await?
            .entry(key)
            .await
            .map_err(KVError::backend)?;
        Ok(entry.and_then(Self::live_entry))
    }

    async fn create(&self, key: &str, value: Bytes) -> KVResult<Option<u64>> {
        match self.store().await?.create(key, value).await {
            Ok(revision) => Ok(Some(revision)),
            Err(e) => {
                // a live entry means we lost the race, anything else is a real failure
                if self.entry(key).await?.is_some() {
                    Ok(None)
                } else {
                    Err(KVError::backend(e))
                }
            }
        }
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> KVResult<Option<u64>> {
        match self.store().await?.update(key, value, revision).await {
            Ok(revision) => Ok(Some(revision)),
            Err(e) => match self.entry(key).await? {
                Some(current) if current.revision == revision => Err(KVError::backend(e)),
                _ => {
                    debug!(key, revision, "KV update lost on revision conflict");
                    Ok(None)
                }
            },
        }
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        self.store()
            .await?
            .delete(key)
            .await
            .map_err(KVError::backend)
    }
}

#[cfg(all(test, feature = "nats-tests"))]
mod tests {
    use super::*;
    use crate::jetstream::config::ClientConfig;
    use crate::jetstream::create_js_context;

    #[tokio::test]
    async fn test_compare_and_set_against_jetstream() {
        let context = create_js_context(ClientConfig::default()).await.unwrap();
        let store = JetstreamKVStore::new(context, "eventhost_kv_cas_test");
        store.delete_bucket().await.unwrap();
        assert!(!store.bucket_exists().await.unwrap());

        store.ensure_bucket().await.unwrap();
        store.ensure_bucket().await.unwrap();
        assert!(store.bucket_exists().await.unwrap());

        let revision = store
            .create("0", Bytes::from_static(b"a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.create("0", Bytes::from_static(b"b")).await.unwrap(), None);

        let next = store
            .update("0", Bytes::from_static(b"c"), revision)
            .await
            .unwrap();
        assert!(next.is_some());
        // stale revision
        assert_eq!(
            store
                .update("0", Bytes::from_static(b"d"), revision)
                .await
                .unwrap(),
            None
        );

        store.delete("0").await.unwrap();
        assert_eq!(store.entry("0").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());

        store.delete_bucket().await.unwrap();
        assert!(matches!(
            store.entry("0").await,
            Err(KVError::BucketNotFound(bucket)) if bucket == "eventhost_kv_cas_test"
        ));
    }
}
