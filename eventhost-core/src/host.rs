//! The processor host divides the partitions of a hub with the other hosts sharing its stores.
//!
//! A host bootstraps the stores once from the management node, then scans on a fixed interval:
//! it renews the leases it owns and acquires available ones until it holds its fair share. Live
//! leases of other hosts are never taken, partitions move only when their owner releases them or
//! lets them expire. Ownership changes are published as [OwnershipEvent]s so that the consumers
//! of the partitions can start from the checkpoint or stop.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, Checkpointer};
use crate::config::{HostConfig, InitialPosition};
use crate::error::{Error, Result};
use crate::lease::{Lease, Leaser, is_available};
use crate::management::Management;

#[derive(Debug, Clone, PartialEq)]
pub enum OwnershipEvent {
    /// Start consuming the partition from `checkpoint`.
    Acquired { lease: Lease, checkpoint: Checkpoint },
    /// Stop consuming the partition, another host may own it now.
    Lost { partition_id: String },
}

pub struct EventProcessorHost<L, C, M> {
    leaser: L,
    checkpointer: C,
    management: M,
    config: HostConfig,
    /// Leases this host believes it holds, by partition.
    owned: Mutex<BTreeMap<String, Lease>>,
    events: mpsc::Sender<OwnershipEvent>,
}

impl<L, C, M> EventProcessorHost<L, C, M>
where
    L: Leaser,
    C: Checkpointer,
    M: Management,
{
    /// Creates the host and the receiving end of its ownership events.
    pub fn new(
        leaser: L,
        checkpointer: C,
        management: M,
        config: HostConfig,
    ) -> (Self, mpsc::Receiver<OwnershipEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer_size.max(1));
        let host = Self {
            leaser,
            checkpointer,
            management,
            config,
            owned: Mutex::new(BTreeMap::new()),
            events,
        };
        (host, rx)
    }

    pub fn owner(&self) -> &str {
        self.leaser.owner()
    }

    /// Partitions currently held, sorted.
    pub fn owned_partitions(&self) -> Vec<String> {
        self.owned.lock().keys().cloned().collect()
    }

    /// Initializes both stores and ensures a lease and a checkpoint for every partition of the
    /// hub. Returns the partition ids.
    pub async fn bootstrap(&self, cancel: CancellationToken) -> Result<Vec<String>> {
        self.leaser.ensure_store(cancel.clone()).await?;
        self.checkpointer.ensure_store(cancel.clone()).await?;

        let hub = self
            .management
            .hub_runtime_information(cancel.clone())
            .await?;

        for partition_id in &hub.partition_ids {
            self.leaser
                .ensure_lease(partition_id, cancel.clone())
                .await?;
            let checkpoint = self
                .checkpointer
                .ensure_checkpoint(partition_id, cancel.clone())
                .await?;

            if self.config.initial_position == InitialPosition::Latest
                && checkpoint.is_start_of_stream()
            {
                self.seed_latest(partition_id, cancel.clone()).await?;
            }
        }

        info!(
            hub = %hub.path,
            partitions = hub.partition_ids.len(),
            owner = %self.owner(),
            "Bootstrapped lease and checkpoint stores"
        );
        Ok(hub.partition_ids)
    }

    /// Moves a never processed partition to its current high-water mark.
    async fn seed_latest(&self, partition_id: &str, cancel: CancellationToken) -> Result<()> {
        let info = self
            .management
            .partition_runtime_information(partition_id, cancel.clone())
            .await?;
        let checkpoint = Checkpoint {
            partition_id: partition_id.to_string(),
            sequence_number: info.last_sequence_number,
            offset: info.last_enqueued_offset,
            enqueued_time_utc: info.last_enqueued_time_utc,
        };
        self.checkpointer
            .update_checkpoint(partition_id, &checkpoint, cancel)
            .await?;
        debug!(
            partition_id,
            sequence_number = checkpoint.sequence_number,
            "Seeded checkpoint at the latest position"
        );
        Ok(())
    }

    /// One balancing round: renew what is owned, then acquire available leases up to the fair
    /// share `ceil(partitions / hosts)`, where hosts are the owners of live leases plus this one.
    pub async fn scan(&self, cancel: CancellationToken) -> Result<()> {
        self.renew_owned(cancel.clone()).await?;

        let leases = self.leaser.get_leases(cancel.clone()).await?;
        let now = Utc::now();

        let mut hosts: HashSet<&str> = leases
            .iter()
            .filter(|lease| !is_available(lease, now))
            .map(|lease| lease.owner.as_str())
            .collect();
        hosts.insert(self.owner());
        let fair_share = leases.len().div_ceil(hosts.len());

        let mut available: Vec<&Lease> = leases
            .iter()
            .filter(|lease| is_available(lease, now))
            .collect();
        available.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));

        for lease in available {
            if self.owned.lock().len() >= fair_share {
                break;
            }
            match self.try_acquire(&lease.partition_id, cancel.clone()).await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(
                    partition_id = %lease.partition_id,
                    error = ?e,
                    "Failed to acquire partition"
                ),
            }
        }

        debug!(
            owner = %self.owner(),
            owned = self.owned.lock().len(),
            fair_share,
            hosts = hosts.len(),
            "Finished lease scan"
        );
        Ok(())
    }

    async fn renew_owned(&self, cancel: CancellationToken) -> Result<()> {
        for partition_id in self.owned_partitions() {
            match self.leaser.renew_lease(&partition_id, cancel.clone()).await {
                Ok((lease, true)) => {
                    self.owned.lock().insert(partition_id, lease);
                }
                Ok((lease, false)) => {
                    warn!(partition_id = %partition_id, holder = %lease.owner, "Lease lost before renewal");
                    self.lose(&partition_id).await;
                }
                Err(Error::NotFound(_)) => {
                    warn!(partition_id = %partition_id, "Lease was deleted");
                    self.lose(&partition_id).await;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                // keep it, the next scan retries before the lease expires
                Err(e) => warn!(partition_id = %partition_id, error = ?e, "Failed to renew lease"),
            }
        }
        Ok(())
    }

    async fn try_acquire(&self, partition_id: &str, cancel: CancellationToken) -> Result<()> {
        let (lease, acquired) = self
            .leaser
            .acquire_lease(partition_id, cancel.clone())
            .await?;
        if !acquired {
            return Ok(());
        }

        let checkpoint = match self
            .checkpointer
            .ensure_checkpoint(partition_id, cancel.clone())
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                // nobody could consume it until expiry otherwise
                if let Err(release_err) = self.leaser.release_lease(partition_id, cancel).await {
                    warn!(partition_id, error = ?release_err, "Failed to release unusable lease");
                }
                return Err(e);
            }
        };
        self.owned
            .lock()
            .insert(partition_id.to_string(), lease.clone());
        self.publish(OwnershipEvent::Acquired { lease, checkpoint })
            .await;
        Ok(())
    }

    async fn lose(&self, partition_id: &str) {
        if self.owned.lock().remove(partition_id).is_some() {
            self.publish(OwnershipEvent::Lost {
                partition_id: partition_id.to_string(),
            })
            .await;
        }
    }

    async fn publish(&self, event: OwnershipEvent) {
        if self.events.send(event).await.is_err() {
            debug!(owner = %self.owner(), "Ownership event receiver is gone");
        }
    }

    /// Records progress for a partition this host owns. The lease is updated first, which fails
    /// if the lease was lost and otherwise publishes a new fencing epoch.
    pub async fn checkpoint(
        &self,
        partition_id: &str,
        checkpoint: &Checkpoint,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (lease, held) = self
            .leaser
            .update_lease(partition_id, cancel.clone())
            .await?;
        if !held {
            self.lose(partition_id).await;
            return Err(Error::LeaseLost(partition_id.to_string()));
        }
        self.owned.lock().insert(partition_id.to_string(), lease);

        self.checkpointer
            .update_checkpoint(partition_id, checkpoint, cancel)
            .await
    }

    /// Bootstraps, then scans every scan interval until `cancel` fires. On the way out all
    /// owned leases are released so other hosts can pick the partitions up right away.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.config.validate()?;
        self.bootstrap(cancel.clone()).await?;

        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.scan(cancel.clone()).await {
                        Ok(()) => {}
                        Err(Error::Cancelled) => break,
                        Err(e) => warn!(owner = %self.owner(), error = ?e, "Lease scan failed"),
                    }
                }
            }
        }

        info!(owner = %self.owner(), "Shutting down processor host");
        self.shutdown().await
    }

    /// Releases every owned lease and closes the stores.
    pub async fn shutdown(&self) -> Result<()> {
        // the caller's token is usually cancelled by now
        let cancel = CancellationToken::new();
        for partition_id in self.owned_partitions() {
            match self.leaser.release_lease(&partition_id, cancel.clone()).await {
                Ok(true) => {}
                Ok(false) => debug!(partition_id = %partition_id, "Lease had already expired"),
                Err(e) => warn!(partition_id = %partition_id, error = ?e, "Failed to release lease"),
            }
            self.lose(&partition_id).await;
        }

        self.leaser.close().await?;
        self.checkpointer.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::DateTime;

    use eventhost_testing::simplekvstore::SimpleKVStore;

    use super::*;
    use crate::checkpoint::kv::KVCheckpointer;
    use crate::checkpoint::memory::InMemoryCheckpointer;
    use crate::lease::memory::InMemoryLeaser;
    use crate::management::{PartitionRuntimeInformation, StaticManagement};

    type TestHost = EventProcessorHost<InMemoryLeaser, InMemoryCheckpointer, StaticManagement>;

    const PARTITIONS: [&str; 4] = ["0", "1", "2", "3"];

    fn config(lease_duration: Duration) -> HostConfig {
        HostConfig {
            lease_duration,
            scan_interval: lease_duration / 3,
            ..HostConfig::default()
        }
    }

    fn host(
        leaser: InMemoryLeaser,
        checkpointer: InMemoryCheckpointer,
        management: StaticManagement,
        config: HostConfig,
    ) -> (TestHost, mpsc::Receiver<OwnershipEvent>) {
        EventProcessorHost::new(leaser, checkpointer, management, config)
    }

    /// Two hosts sharing the same stores.
    fn pair(
        lease_duration: Duration,
    ) -> (
        (TestHost, mpsc::Receiver<OwnershipEvent>),
        (TestHost, mpsc::Receiver<OwnershipEvent>),
    ) {
        let leaser = InMemoryLeaser::new("A", lease_duration);
        let checkpointer = InMemoryCheckpointer::new("A");
        let management = StaticManagement::new("orders", PARTITIONS);
        let host_b = host(
            leaser.with_owner("B"),
            checkpointer.with_owner("B"),
            management.clone(),
            config(lease_duration),
        );
        let host_a = host(leaser, checkpointer, management, config(lease_duration));
        (host_a, host_b)
    }

    fn drain(rx: &mut mpsc::Receiver<OwnershipEvent>) -> Vec<OwnershipEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_single_host_takes_every_partition() {
        let ((host_a, mut rx), _) = pair(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let partitions = host_a.bootstrap(cancel.clone()).await.unwrap();
        assert_eq!(partitions, PARTITIONS);
        host_a.scan(cancel).await.unwrap();
        assert_eq!(host_a.owned_partitions(), PARTITIONS);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        for event in events {
            let OwnershipEvent::Acquired { lease, checkpoint } = event else {
                panic!("expected only acquisitions");
            };
            assert_eq!(lease.owner, "A");
            assert_eq!(lease.epoch, 1);
            assert_eq!(checkpoint, Checkpoint::start_of_stream(&lease.partition_id));
        }
    }

    #[tokio::test]
    async fn test_second_host_takes_over_after_release() {
        let ((host_a, mut rx_a), (host_b, mut rx_b)) = pair(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        host_a.bootstrap(cancel.clone()).await.unwrap();
        host_a.scan(cancel.clone()).await.unwrap();
        host_b.bootstrap(cancel.clone()).await.unwrap();

        // live leases are never stolen
        host_b.scan(cancel.clone()).await.unwrap();
        assert!(host_b.owned_partitions().is_empty());

        host_a.shutdown().await.unwrap();
        assert!(host_a.owned_partitions().is_empty());
        let lost = drain(&mut rx_a)
            .into_iter()
            .filter(|event| matches!(event, OwnershipEvent::Lost { .. }))
            .count();
        assert_eq!(lost, 4);

        host_b.scan(cancel).await.unwrap();
        assert_eq!(host_b.owned_partitions(), PARTITIONS);
        for event in drain(&mut rx_b) {
            let OwnershipEvent::Acquired { lease, .. } = event else {
                panic!("expected only acquisitions");
            };
            assert_eq!(lease.epoch, 2);
        }
    }

    #[tokio::test]
    async fn test_expired_partitions_move_to_another_host() {
        let ((host_a, mut rx_a), (host_b, _rx_b)) = pair(Duration::from_millis(300));
        let cancel = CancellationToken::new();

        host_a.bootstrap(cancel.clone()).await.unwrap();
        host_a.scan(cancel.clone()).await.unwrap();
        drain(&mut rx_a);

        // host A stops renewing
        tokio::time::sleep(Duration::from_millis(400)).await;

        host_b.scan(cancel.clone()).await.unwrap();
        assert_eq!(host_b.owned_partitions(), PARTITIONS);

        host_a.scan(cancel).await.unwrap();
        assert!(host_a.owned_partitions().is_empty());
        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 4);
        assert!(
            events
                .iter()
                .all(|event| matches!(event, OwnershipEvent::Lost { .. }))
        );
    }

    #[tokio::test]
    async fn test_concurrent_scans_never_share_a_partition() {
        let ((host_a, _rx_a), (host_b, _rx_b)) = pair(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        host_a.bootstrap(cancel.clone()).await.unwrap();

        let (a, b) = tokio::join!(host_a.scan(cancel.clone()), host_b.scan(cancel.clone()));
        a.unwrap();
        b.unwrap();

        let owned_a: HashSet<String> = host_a.owned_partitions().into_iter().collect();
        let owned_b: HashSet<String> = host_b.owned_partitions().into_iter().collect();
        assert!(owned_a.is_disjoint(&owned_b));
        assert_eq!(owned_a.len() + owned_b.len(), PARTITIONS.len());
    }

    #[tokio::test]
    async fn test_checkpoint_requires_ownership() {
        let ((host_a, _rx_a), (host_b, _rx_b)) = pair(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        host_a.bootstrap(cancel.clone()).await.unwrap();
        host_a.scan(cancel.clone()).await.unwrap();

        let progress = Checkpoint {
            partition_id: "2".to_string(),
            sequence_number: 15,
            offset: "1500".to_string(),
            enqueued_time_utc: Utc::now(),
        };

        assert!(matches!(
            host_b.checkpoint("2", &progress, cancel.clone()).await,
            Err(Error::LeaseLost(pid)) if pid == "2"
        ));

        host_a
            .checkpoint("2", &progress, cancel.clone())
            .await
            .unwrap();
        let stored = host_a
            .checkpointer
            .get_checkpoint("2", cancel.clone())
            .await
            .unwrap();
        assert_eq!(stored, Some(progress));

        // a fresh fencing epoch was published
        let lease = host_a
            .leaser
            .get_leases(cancel)
            .await
            .unwrap()
            .into_iter()
            .find(|lease| lease.partition_id == "2")
            .unwrap();
        assert_eq!(lease.epoch, 2);
    }

    #[tokio::test]
    async fn test_latest_position_seeds_new_partitions_only() {
        let cancel = CancellationToken::new();
        let leaser = InMemoryLeaser::new("A", Duration::from_secs(30));
        let checkpointer = InMemoryCheckpointer::new("A");
        let management = StaticManagement::new("orders", ["0", "1"]).with_partition(
            PartitionRuntimeInformation {
                hub_path: "orders".to_string(),
                partition_id: "1".to_string(),
                beginning_sequence_number: 0,
                last_sequence_number: 57,
                last_enqueued_offset: "9120".to_string(),
                last_enqueued_time_utc: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            },
        );

        // partition 0 already has progress
        checkpointer.ensure_store(cancel.clone()).await.unwrap();
        checkpointer
            .ensure_checkpoint("0", cancel.clone())
            .await
            .unwrap();
        let progress = Checkpoint {
            partition_id: "0".to_string(),
            sequence_number: 5,
            offset: "500".to_string(),
            enqueued_time_utc: Utc::now(),
        };
        checkpointer
            .update_checkpoint("0", &progress, cancel.clone())
            .await
            .unwrap();

        let (host, _rx) = host(
            leaser,
            checkpointer.clone(),
            management,
            HostConfig {
                initial_position: InitialPosition::Latest,
                ..HostConfig::default()
            },
        );
        host.bootstrap(cancel.clone()).await.unwrap();

        let seeded = checkpointer
            .get_checkpoint("1", cancel.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seeded.sequence_number, 57);
        assert_eq!(seeded.offset, "9120");

        let kept = checkpointer.get_checkpoint("0", cancel).await.unwrap();
        assert_eq!(kept, Some(progress));
    }

    #[tokio::test]
    async fn test_run_releases_leases_on_cancellation() {
        let ((host_a, mut rx_a), _) = pair(Duration::from_millis(300));
        let host_a = Arc::new(host_a);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let host = Arc::clone(&host_a);
            let cancel = cancel.clone();
            async move { host.run(cancel).await }
        });

        for _ in PARTITIONS {
            let event = rx_a.recv().await.unwrap();
            assert!(matches!(event, OwnershipEvent::Acquired { .. }));
        }

        // keeps renewing past the lease duration
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(host_a.owned_partitions(), PARTITIONS);

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let leases = host_a
            .leaser
            .get_leases(CancellationToken::new())
            .await
            .unwrap();
        assert!(leases.iter().all(|lease| lease.owner.is_empty()));
        assert!(leases.iter().all(|lease| lease.epoch == 1));
    }

    #[tokio::test]
    async fn test_failed_checkpoint_setup_releases_the_lease() {
        let cancel = CancellationToken::new();
        let store = SimpleKVStore::new("checkpoints");
        let leaser = InMemoryLeaser::new("A", Duration::from_secs(30));
        let (host, mut rx) = EventProcessorHost::new(
            leaser.clone(),
            KVCheckpointer::new(Arc::new(store.clone()), "A"),
            StaticManagement::new("orders", ["0", "1"]),
            HostConfig::default(),
        );
        host.bootstrap(cancel.clone()).await.unwrap();

        // reading the checkpoint of partition 0 fails once
        store.error_injector().fail_entries(1);
        host.scan(cancel.clone()).await.unwrap();
        assert_eq!(host.owned_partitions(), ["1"]);

        let leases = leaser.get_leases(cancel.clone()).await.unwrap();
        let lease = leases.iter().find(|lease| lease.partition_id == "0").unwrap();
        assert!(lease.owner.is_empty());

        host.scan(cancel).await.unwrap();
        assert_eq!(host.owned_partitions(), ["0", "1"]);

        let acquired: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|event| match event {
                OwnershipEvent::Acquired { lease, .. } => lease.partition_id,
                OwnershipEvent::Lost { .. } => panic!("expected only acquisitions"),
            })
            .collect();
        assert_eq!(acquired, ["1", "0"]);
    }

    #[tokio::test]
    async fn test_run_rejects_zero_scan_interval() {
        let (host, _rx) = host(
            InMemoryLeaser::new("A", Duration::from_secs(30)),
            InMemoryCheckpointer::new("A"),
            StaticManagement::new("orders", PARTITIONS),
            HostConfig {
                scan_interval: Duration::ZERO,
                ..HostConfig::default()
            },
        );
        assert!(matches!(
            host.run(CancellationToken::new()).await,
            Err(Error::Config(_))
        ));
        assert!(host.owned_partitions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_hub_owns_nothing() {
        let cancel = CancellationToken::new();
        let (host, _rx) = host(
            InMemoryLeaser::new("A", Duration::from_secs(30)),
            InMemoryCheckpointer::new("A"),
            StaticManagement::new("orders", Vec::<String>::new()),
            HostConfig::default(),
        );
        assert!(host.bootstrap(cancel.clone()).await.unwrap().is_empty());
        host.scan(cancel).await.unwrap();
        assert!(host.owned_partitions().is_empty());
    }
}
