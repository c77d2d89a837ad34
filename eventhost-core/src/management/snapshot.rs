use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{HubRuntimeInformation, Management, PartitionRuntimeInformation};
use crate::error::{Error, Result};

/// Document layout of a runtime snapshot: the hub answer and one answer per partition.
#[derive(Debug, Deserialize)]
struct RuntimeSnapshot {
    hub: HubRuntimeInformation,
    #[serde(default)]
    partitions: Vec<PartitionRuntimeInformation>,
}

/// StaticManagement answers from a snapshot taken once. Partitions listed by the hub without
/// their own entry report an empty stream.
#[derive(Debug, Clone)]
pub struct StaticManagement {
    hub: Arc<HubRuntimeInformation>,
    partitions: Arc<HashMap<String, PartitionRuntimeInformation>>,
}

impl StaticManagement {
    /// A hub with the given partitions, all of them empty.
    pub fn new<I, S>(hub_path: impl Into<String>, partition_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let partition_ids: Vec<String> = partition_ids.into_iter().map(Into::into).collect();
        Self::from_parts(
            HubRuntimeInformation {
                path: hub_path.into(),
                created_at: Utc::now(),
                partition_count: partition_ids.len(),
                partition_ids,
            },
            Vec::new(),
        )
    }

    /// Parses a snapshot document, `{"hub": {...}, "partitions": [...]}` with the management
    /// node's field names.
    pub fn from_json(document: &str) -> Result<Self> {
        let snapshot: RuntimeSnapshot = serde_json::from_str(document)
            .map_err(|e| Error::Management(format!("Invalid runtime snapshot: {e}")))?;
        Self::validate(&snapshot)?;
        Ok(Self::from_parts(snapshot.hub, snapshot.partitions))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            Error::Management(format!(
                "Failed to read runtime snapshot {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&document)
    }

    /// Replaces the runtime information of one partition.
    pub fn with_partition(self, info: PartitionRuntimeInformation) -> Self {
        let mut partitions = Arc::unwrap_or_clone(self.partitions);
        partitions.insert(info.partition_id.clone(), info);
        Self {
            hub: self.hub,
            partitions: Arc::new(partitions),
        }
    }

    fn from_parts(hub: HubRuntimeInformation, partitions: Vec<PartitionRuntimeInformation>) -> Self {
        Self {
            hub: Arc::new(hub),
            partitions: Arc::new(
                partitions
                    .into_iter()
                    .map(|info| (info.partition_id.clone(), info))
                    .collect(),
            ),
        }
    }

    fn validate(snapshot: &RuntimeSnapshot) -> Result<()> {
        let hub = &snapshot.hub;
        if hub.partition_count != hub.partition_ids.len() {
            return Err(Error::Management(format!(
                "Hub {} declares {} partitions but lists {}",
                hub.path,
                hub.partition_count,
                hub.partition_ids.len()
            )));
        }
        if let Some(unknown) = snapshot
            .partitions
            .iter()
            .find(|info| !hub.partition_ids.contains(&info.partition_id))
        {
            return Err(Error::Management(format!(
                "Partition {} is not listed by hub {}",
                unknown.partition_id, hub.path
            )));
        }
        Ok(())
    }

    fn empty_partition(&self, partition_id: &str) -> PartitionRuntimeInformation {
        PartitionRuntimeInformation {
            hub_path: self.hub.path.clone(),
            partition_id: partition_id.to_string(),
            beginning_sequence_number: 0,
            last_sequence_number: 0,
            last_enqueued_offset: String::new(),
            last_enqueued_time_utc: DateTime::default(),
        }
    }
}

impl Management for StaticManagement {
    async fn hub_runtime_information(
        &self,
        _cancel: CancellationToken,
    ) -> Result<HubRuntimeInformation> {
        Ok(self.hub.as_ref().clone())
    }

    async fn partition_runtime_information(
        &self,
        partition_id: &str,
        _cancel: CancellationToken,
    ) -> Result<PartitionRuntimeInformation> {
        if let Some(info) = self.partitions.get(partition_id) {
            return Ok(info.clone());
        }
        if self.hub.partition_ids.iter().any(|id| id == partition_id) {
            return Ok(self.empty_partition(partition_id));
        }
        Err(Error::NotFound(partition_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SNAPSHOT: &str = r#"{
        "hub": {
            "name": "orders",
            "created_at": "2024-03-01T10:00:00Z",
            "partition_count": 2,
            "partition_ids": ["0", "1"]
        },
        "partitions": [{
            "name": "orders",
            "partition": "1",
            "begin_sequence_number": 0,
            "last_enqueued_sequence_number": 57,
            "last_enqueued_offset": "9120",
            "last_enqueued_time_utc": "2024-03-02T08:30:00Z"
        }]
    }"#;

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();

        let management = StaticManagement::load(file.path()).unwrap();
        let cancel = CancellationToken::new();

        let hub = management
            .hub_runtime_information(cancel.clone())
            .await
            .unwrap();
        assert_eq!(hub.path, "orders");
        assert_eq!(hub.partition_ids, vec!["0", "1"]);

        let partition = management
            .partition_runtime_information("1", cancel.clone())
            .await
            .unwrap();
        assert_eq!(partition.last_sequence_number, 57);
        assert_eq!(partition.last_enqueued_offset, "9120");

        // listed without an entry
        let partition = management
            .partition_runtime_information("0", cancel.clone())
            .await
            .unwrap();
        assert_eq!(partition.last_sequence_number, 0);
        assert_eq!(partition.hub_path, "orders");

        assert!(matches!(
            management.partition_runtime_information("2", cancel).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_snapshots() {
        assert!(matches!(
            StaticManagement::load("/nonexistent/runtime.json"),
            Err(Error::Management(_))
        ));
        assert!(matches!(
            StaticManagement::from_json("{}"),
            Err(Error::Management(_))
        ));

        let miscounted = SNAPSHOT.replace("\"partition_count\": 2", "\"partition_count\": 3");
        assert!(matches!(
            StaticManagement::from_json(&miscounted),
            Err(Error::Management(_))
        ));

        let unlisted = SNAPSHOT.replace("\"partition\": \"1\"", "\"partition\": \"9\"");
        assert!(matches!(
            StaticManagement::from_json(&unlisted),
            Err(Error::Management(_))
        ));
    }

    #[tokio::test]
    async fn test_with_partition() {
        let management = StaticManagement::new("orders", ["0"]).with_partition(
            PartitionRuntimeInformation {
                hub_path: "orders".to_string(),
                partition_id: "0".to_string(),
                beginning_sequence_number: 0,
                last_sequence_number: 10,
                last_enqueued_offset: "640".to_string(),
                last_enqueued_time_utc: Utc::now(),
            },
        );
        let partition = management
            .partition_runtime_information("0", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(partition.last_sequence_number, 10);
    }
}
