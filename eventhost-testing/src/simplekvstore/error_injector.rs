//! Error injection controller for KV store testing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Controller for injecting errors during KV store testing.
///
/// This allows tests to force specific error conditions like operation failures, lost
/// compare-and-set races and slow backends.
#[derive(Debug, Default)]
pub struct KVErrorInjector {
    /// Fail the next N keys operations.
    fail_next_keys: AtomicUsize,
    /// Fail the next N entry operations.
    fail_next_entries: AtomicUsize,
    /// Fail the next N create operations.
    fail_next_creates: AtomicUsize,
    /// Fail the next N update operations.
    fail_next_updates: AtomicUsize,
    /// Fail the next N delete operations.
    fail_next_deletes: AtomicUsize,
    /// Make the next N updates lose their compare-and-set.
    conflict_next_updates: AtomicUsize,
    /// Artificial read latency (keys, entry) in milliseconds.
    read_latency_ms: AtomicU64,
    /// Artificial write latency (create, update, delete) in milliseconds.
    write_latency_ms: AtomicU64,
}

impl KVErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    // === Failure injection setters ===

    /// Fail the next N keys operations.
    pub fn fail_keys(&self, count: usize) {
        self.fail_next_keys.store(count, Ordering::Relaxed);
    }

    /// Fail the next N entry operations.
    pub fn fail_entries(&self, count: usize) {
        self.fail_next_entries.store(count, Ordering::Relaxed);
    }

    /// Fail the next N create operations.
    pub fn fail_creates(&self, count: usize) {
        self.fail_next_creates.store(count, Ordering::Relaxed);
    }

    /// Fail the next N update operations.
    pub fn fail_updates(&self, count: usize) {
        self.fail_next_updates.store(count, Ordering::Relaxed);
    }

    /// Fail the next N delete operations.
    pub fn fail_deletes(&self, count: usize) {
        self.fail_next_deletes.store(count, Ordering::Relaxed);
    }

    /// The next N updates find the key at a newer revision than the caller read, as if another
    /// writer got there first.
    pub fn conflict_updates(&self, count: usize) {
        self.conflict_next_updates.store(count, Ordering::Relaxed);
    }

    // === Latency injection setters ===

    /// Set artificial latency of keys and entry.
    pub fn set_read_latency(&self, ms: u64) {
        self.read_latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Set artificial latency of create, update and delete.
    pub fn set_write_latency(&self, ms: u64) {
        self.write_latency_ms.store(ms, Ordering::Relaxed);
    }

    // === Internal check methods ===

    pub(crate) fn should_fail_keys(&self) -> bool {
        Self::decrement_counter(&self.fail_next_keys)
    }

    pub(crate) fn should_fail_entry(&self) -> bool {
        Self::decrement_counter(&self.fail_next_entries)
    }

    pub(crate) fn should_fail_create(&self) -> bool {
        Self::decrement_counter(&self.fail_next_creates)
    }

    pub(crate) fn should_fail_update(&self) -> bool {
        Self::decrement_counter(&self.fail_next_updates)
    }

    pub(crate) fn should_fail_delete(&self) -> bool {
        Self::decrement_counter(&self.fail_next_deletes)
    }

    pub(crate) fn should_conflict_update(&self) -> bool {
        Self::decrement_counter(&self.conflict_next_updates)
    }

    /// Decrements the counter and returns true if it was > 0.
    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_sub(1))
            .is_ok()
    }

    // === Latency application methods ===

    pub(crate) async fn apply_read_latency(&self) {
        Self::apply_latency(&self.read_latency_ms).await;
    }

    pub(crate) async fn apply_write_latency(&self) {
        Self::apply_latency(&self.write_latency_ms).await;
    }

    async fn apply_latency(latency_ms: &AtomicU64) {
        let ms = latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}
