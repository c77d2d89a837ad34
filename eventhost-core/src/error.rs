use eventhost_shared::kv::KVError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Hard errors of the lease and checkpoint stores. Losing a lease race, renewing a lease held by
/// someone else or releasing an expired lease are not errors, those are reported as `false`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The partition was never ensured (or was deleted) in the store.
    #[error("Partition {0} is not in the store")]
    NotFound(String),

    /// The store was not initialized with `ensure_store` (or was deleted).
    #[error("{0} store is not initialized")]
    StoreNotInitialized(String),

    #[error("CancellationToken Cancelled")]
    Cancelled,

    /// The host no longer owns the partition it tried to work on.
    #[error("Lease for partition {0} is lost")]
    LeaseLost(String),

    /// A compare-and-set kept losing against concurrent writers.
    #[error("Conflicting concurrent update of partition {0}")]
    Conflict(String),

    #[error("KV Error - {0}")]
    KV(String),

    #[error("Serde Error - {0}")]
    Serde(String),

    #[error("Management Error - {0}")]
    Management(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Error in Shared - {0}")]
    Shared(eventhost_shared::error::Error),
}

impl From<eventhost_shared::error::Error> for Error {
    fn from(value: eventhost_shared::error::Error) -> Self {
        Error::Shared(value)
    }
}

impl From<KVError> for Error {
    fn from(value: KVError) -> Self {
        match value {
            KVError::BucketNotFound(bucket) => Error::StoreNotInitialized(bucket),
            KVError::Backend(e) => Error::KV(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Serde(value.to_string())
    }
}
