//! Helpers shared by the KV backed stores.

use std::future::Future;

use bytes::Bytes;
use eventhost_shared::kv::{KVEntry, KVResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How many times a read-modify-write against the KV store is attempted before giving up on a
/// key that keeps changing underneath.
pub(crate) const MAX_CAS_ATTEMPTS: usize = 3;

/// Runs a KV operation unless the token is cancelled first. A cancelled token never starts the
/// operation.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = KVResult<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result.map_err(Error::from),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub(crate) fn decode<T: DeserializeOwned>(entry: &KVEntry) -> Result<T> {
    serde_json::from_slice(&entry.value).map_err(|e| {
        Error::Serde(format!(
            "Failed to decode key {} at revision {}: {e}",
            entry.key, entry.revision
        ))
    })
}
