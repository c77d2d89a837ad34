use std::time::Duration;

use backoff::retry::Retry;
use backoff::strategy::fixed;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{HubRuntimeInformation, Management, PartitionRuntimeInformation};
use crate::error::{Error, Result};

const MANAGEMENT_RETRY_INTERVAL_MILLIS: u64 = 1000;
const MANAGEMENT_MAX_RETRIES: usize = 3;

/// Retries every query of the wrapped [Management] on a fixed interval. Cancellation and unknown
/// partitions are not retried.
pub struct RetryingManagement<M> {
    inner: M,
    interval: Duration,
    max_retries: usize,
}

impl<M: Management> RetryingManagement<M> {
    /// Three retries, one second apart.
    pub fn new(inner: M) -> Self {
        Self::with_policy(
            inner,
            Duration::from_millis(MANAGEMENT_RETRY_INTERVAL_MILLIS),
            MANAGEMENT_MAX_RETRIES,
        )
    }

    pub fn with_policy(inner: M, interval: Duration, max_retries: usize) -> Self {
        Self {
            inner,
            interval,
            max_retries,
        }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    fn backoff(&self) -> std::iter::Take<fixed::Interval> {
        fixed::Interval::new(self.interval).take(self.max_retries)
    }
}

fn can_retry(err: &Error) -> bool {
    match err {
        Error::Cancelled | Error::NotFound(_) => false,
        _ => {
            warn!(error = ?err, "Management query failed, retrying");
            true
        }
    }
}

impl<M: Management> Management for RetryingManagement<M> {
    async fn hub_runtime_information(
        &self,
        cancel: CancellationToken,
    ) -> Result<HubRuntimeInformation> {
        Retry::new(
            self.backoff(),
            || self.inner.hub_runtime_information(cancel.clone()),
            can_retry,
        )
        .with_cancellation(cancel.clone(), || Error::Cancelled)
        .await
    }

    async fn partition_runtime_information(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<PartitionRuntimeInformation> {
        Retry::new(
            self.backoff(),
            || {
                self.inner
                    .partition_runtime_information(partition_id, cancel.clone())
            },
            can_retry,
        )
        .with_cancellation(cancel.clone(), || Error::Cancelled)
        .await
    }
}
