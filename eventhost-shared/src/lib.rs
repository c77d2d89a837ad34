/// Error exposed by the shared library.
pub mod error;

/// Revisioned key-value store seam used by the durable lease and checkpoint stores.
pub mod kv;

/// JetStream client configuration and connection.
pub mod jetstream;
