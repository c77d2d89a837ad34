//! Bootstrap collaborator. The management node of the stream answers two read-only queries, the
//! partition set of the hub and the runtime metadata of one partition. The processor host uses
//! the answers once at startup to seed the lease and checkpoint stores.
//!
//! The payloads mirror the property maps returned by the management node, hence the wire names
//! in the serde renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Retry wrapper with the fixed bootstrap policy.
pub mod retry;

/// Management answering from a fixed snapshot.
pub mod snapshot;

pub use retry::RetryingManagement;
pub use snapshot::StaticManagement;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubRuntimeInformation {
    #[serde(rename = "name")]
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub partition_count: usize,
    pub partition_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRuntimeInformation {
    #[serde(rename = "name")]
    pub hub_path: String,
    #[serde(rename = "partition")]
    pub partition_id: String,
    #[serde(rename = "begin_sequence_number")]
    pub beginning_sequence_number: i64,
    /// High-water mark of the partition.
    #[serde(rename = "last_enqueued_sequence_number")]
    pub last_sequence_number: i64,
    pub last_enqueued_offset: String,
    pub last_enqueued_time_utc: DateTime<Utc>,
}

/// Read-only view of the stream's management node.
#[trait_variant::make(Send)]
pub trait Management: Send + Sync + 'static {
    async fn hub_runtime_information(
        &self,
        cancel: CancellationToken,
    ) -> Result<HubRuntimeInformation>;

    async fn partition_runtime_information(
        &self,
        partition_id: &str,
        cancel: CancellationToken,
    ) -> Result<PartitionRuntimeInformation>;
}
