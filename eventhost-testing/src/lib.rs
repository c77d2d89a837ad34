//! Testing utilities for the event processor host.

/// Simple revisioned KV store for testing the durable lease and checkpoint stores.
pub mod simplekvstore;
