//! Core KV store state and implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use eventhost_shared::kv::{KVEntry, KVError, KVResult, KVStore};

use super::error::SimpleKVStoreError;
use super::error_injector::KVErrorInjector;

/// Internal state of the KV store.
#[derive(Debug, Default)]
pub struct KVState {
    /// Whether the bucket has been created.
    pub(crate) exists: bool,
    /// key -> (value, revision of the last write)
    pub(crate) data: HashMap<String, (Bytes, u64)>,
    /// Bucket-wide revision, incremented on each mutation.
    pub(crate) revision: u64,
}

impl KVState {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Simple in-memory KV store for testing.
///
/// Clones share the same state, so several stores built on clones of one `SimpleKVStore` behave
/// like independent processes talking to one backend.
#[derive(Clone)]
pub struct SimpleKVStore {
    /// Shared KV state.
    state: Arc<RwLock<KVState>>,
    /// Store name.
    name: &'static str,
    /// Error injector for testing.
    error_injector: Arc<KVErrorInjector>,
}

impl std::fmt::Debug for SimpleKVStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleKVStore")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl SimpleKVStore {
    /// Create a new simple KV store. The bucket does not exist until
    /// [`KVStore::ensure_bucket`] is called.
    pub fn new(name: &'static str) -> Self {
        Self {
            state: Arc::new(RwLock::new(KVState::default())),
            name,
            error_injector: Arc::new(KVErrorInjector::new()),
        }
    }

    /// Create a store whose bucket already exists.
    pub fn with_bucket(name: &'static str) -> Self {
        let store = Self::new(name);
        store.state.write().exists = true;
        store
    }

    /// Get the error injector for this store.
    pub fn error_injector(&self) -> &Arc<KVErrorInjector> {
        &self.error_injector
    }

    /// Get the current bucket-wide revision.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Get the number of keys in the store.
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().data.is_empty()
    }

    /// Get all values as a snapshot (for testing).
    pub fn snapshot(&self) -> HashMap<String, Bytes> {
        self.state
            .read()
            .data
            .iter()
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect()
    }

    fn bucket_not_found(&self) -> KVError {
        KVError::BucketNotFound(self.name.to_string())
    }
}

#[async_trait]
impl KVStore for SimpleKVStore {
    fn name(&self) -> &str {
        self.name
    }

    async fn bucket_exists(&self) -> KVResult<bool> {
        Ok(self.state.read().exists)
    }

    async fn ensure_bucket(&self) -> KVResult<()> {
        self.state.write().exists = true;
        Ok(())
    }

    async fn delete_bucket(&self) -> KVResult<()> {
        let mut state = self.state.write();
        state.exists = false;
        state.data.clear();
        Ok(())
    }

    async fn keys(&self) -> KVResult<Vec<String>> {
        self.error_injector.apply_read_latency().await;

        if self.error_injector.should_fail_keys() {
            return Err(KVError::backend(SimpleKVStoreError::Keys(
                "injected failure".to_string(),
            )));
        }

        let state = self.state.read();
        if !state.exists {
            return Err(self.bucket_not_found());
        }
        Ok(state.data.keys().cloned().collect())
    }

    async fn entry(&self, key: &str) -> KVResult<Option<KVEntry>> {
        self.error_injector.apply_read_latency().await;

        if self.error_injector.should_fail_entry() {
            return Err(KVError::backend(SimpleKVStoreError::Entry(
                "injected failure".to_string(),
            )));
        }

        let state = self.state.read();
        if !state.exists {
            return Err(self.bucket_not_found());
        }
        Ok(state.data.get(key).map(|(value, revision)| KVEntry {
            key: key.to_string(),
            value: value.clone(),
            revision: *revision,
        }))
    }

    async fn create(&self, key: &str, value: Bytes) -> KVResult<Option<u64>> {
        self.error_injector.apply_write_latency().await;

        if self.error_injector.should_fail_create() {
            return Err(KVError::backend(SimpleKVStoreError::Create(
                "injected failure".to_string(),
            )));
        }

        let mut state = self.state.write();
        if !state.exists {
            return Err(self.bucket_not_found());
        }
        if state.data.contains_key(key) {
            return Ok(None);
        }
        let revision = state.next_revision();
        state.data.insert(key.to_string(), (value, revision));
        Ok(Some(revision))
    }

    async fn update(&self, key: &str, value: Bytes, revision: u64) -> KVResult<Option<u64>> {
        self.error_injector.apply_write_latency().await;

        if self.error_injector.should_fail_update() {
            return Err(KVError::backend(SimpleKVStoreError::Update(
                "injected failure".to_string(),
            )));
        }

        let mut state = self.state.write();
        if !state.exists {
            return Err(self.bucket_not_found());
        }

        if self.error_injector.should_conflict_update() {
            // a competing writer rewrites the current value at a newer revision
            let bumped = state.next_revision();
            if let Some((_, current)) = state.data.get_mut(key) {
                *current = bumped;
            }
            return Ok(None);
        }

        let current = state.data.get(key).map(|(_, current)| *current);
        if current != Some(revision) {
            return Ok(None);
        }
        let next = state.next_revision();
        state.data.insert(key.to_string(), (value, next));
        Ok(Some(next))
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        self.error_injector.apply_write_latency().await;

        if self.error_injector.should_fail_delete() {
            return Err(KVError::backend(SimpleKVStoreError::Delete(
                "injected failure".to_string(),
            )));
        }

        let mut state = self.state.write();
        if !state.exists {
            return Err(self.bucket_not_found());
        }
        if state.data.remove(key).is_some() {
            state.next_revision();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_bucket() {
        let store = SimpleKVStore::new("test-bucket");
        assert!(!store.bucket_exists().await.unwrap());
        assert!(matches!(
            store.entry("0").await,
            Err(KVError::BucketNotFound(name)) if name == "test-bucket"
        ));

        store.ensure_bucket().await.unwrap();
        assert!(store.bucket_exists().await.unwrap());
        assert_eq!(store.entry("0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_only_once() {
        let store = SimpleKVStore::with_bucket("test-bucket");

        let revision = store.create("0", Bytes::from("a")).await.unwrap();
        assert_eq!(revision, Some(1));
        assert_eq!(store.create("0", Bytes::from("b")).await.unwrap(), None);

        let entry = store.entry("0").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from("a"));
        assert_eq!(entry.revision, 1);
    }

    #[tokio::test]
    async fn test_update_compares_revision() {
        let store = SimpleKVStore::with_bucket("test-bucket");
        let revision = store.create("0", Bytes::from("a")).await.unwrap().unwrap();

        let next = store
            .update("0", Bytes::from("b"), revision)
            .await
            .unwrap()
            .unwrap();
        assert!(next > revision);

        // stale revision loses
        assert_eq!(
            store.update("0", Bytes::from("c"), revision).await.unwrap(),
            None
        );
        // missing key loses
        assert_eq!(
            store.update("1", Bytes::from("c"), revision).await.unwrap(),
            None
        );
        assert_eq!(store.snapshot().get("0"), Some(&Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_injected_conflict_bumps_revision() {
        let store = SimpleKVStore::with_bucket("test-bucket");
        let revision = store.create("0", Bytes::from("a")).await.unwrap().unwrap();

        store.error_injector().conflict_updates(1);
        assert_eq!(
            store.update("0", Bytes::from("b"), revision).await.unwrap(),
            None
        );

        let entry = store.entry("0").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from("a"));
        assert!(entry.revision > revision);

        // retrying with the fresh revision succeeds
        assert!(
            store
                .update("0", Bytes::from("b"), entry.revision)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = SimpleKVStore::with_bucket("test-bucket");
        store.error_injector().fail_creates(1);
        store.error_injector().fail_keys(1);

        assert!(store.create("0", Bytes::from("a")).await.is_err());
        assert!(store.create("0", Bytes::from("a")).await.is_ok());
        assert!(store.keys().await.is_err());
        assert_eq!(store.keys().await.unwrap(), vec!["0".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_bucket_wipes_data() {
        let store = SimpleKVStore::with_bucket("test-bucket");
        store.create("0", Bytes::from("a")).await.unwrap();
        store.delete("missing").await.unwrap();

        store.delete_bucket().await.unwrap();
        assert!(!store.bucket_exists().await.unwrap());
        assert!(store.is_empty());

        // idempotent
        store.delete_bucket().await.unwrap();
    }
}
