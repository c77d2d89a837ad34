//! Simple KV store implementation for testing.
//!
//! This module provides an in-memory, revisioned KV store that implements the `KVStore` trait
//! from `eventhost_shared::kv`, with compare-and-set semantics equivalent to JetStream KV. It
//! allows error injection to test negative cases of the KV-backed stores.
//!
//! # Features
//! - Full `KVStore` trait implementation including bucket lifecycle
//! - Failure injection per operation (keys, entry, create, update, delete)
//! - Revision conflict injection, simulating a competing writer between a read and a CAS
//! - Latency injection for reads and writes
//!
//! # Example
//! ```ignore
//! use eventhost_testing::simplekvstore::SimpleKVStore;
//! use eventhost_shared::kv::KVStore;
//! use bytes::Bytes;
//!
//! let store = SimpleKVStore::new("leases");
//! store.ensure_bucket().await.unwrap();
//!
//! let revision = store.create("0", Bytes::from("a")).await.unwrap().unwrap();
//!
//! // the next update loses the race
//! store.error_injector().conflict_updates(1);
//! assert_eq!(store.update("0", Bytes::from("b"), revision).await.unwrap(), None);
//! ```

/// Error types for the simple KV store.
mod error;
/// Error injection controller.
mod error_injector;
/// Core store implementation.
mod store;

pub use error::{Result, SimpleKVStoreError};
pub use error_injector::KVErrorInjector;
pub use store::{KVState, SimpleKVStore};
