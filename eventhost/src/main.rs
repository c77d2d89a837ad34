use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::ArgMatches;
use eventhost_core::checkpoint::Checkpointer;
use eventhost_core::checkpoint::kv::KVCheckpointer;
use eventhost_core::checkpoint::memory::InMemoryCheckpointer;
use eventhost_core::config::HostConfig;
use eventhost_core::host::{EventProcessorHost, OwnershipEvent};
use eventhost_core::lease::Leaser;
use eventhost_core::lease::kv::KVLeaser;
use eventhost_core::lease::memory::InMemoryLeaser;
use eventhost_core::management::{Management, RetryingManagement, StaticManagement};
use eventhost_shared::jetstream::{config::ClientConfig, create_js_context};
use eventhost_shared::kv::KVStore;
use eventhost_shared::kv::jetstream::JetstreamKVStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    // Setup the CryptoProvider (controls core cryptography used by rustls) for the process
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "Failed to install the default CryptoProvider")?;

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let env_vars: HashMap<String, String> = env::vars().collect();

    match matches.subcommand() {
        Some(("run", args)) => run_host(args, env_vars).await,
        Some(("reset", args)) => reset_stores(args, env_vars).await,
        Some((name, _)) => Err(format!("Unknown subcommand {name}").into()),
        None => Err("No subcommand given".into()),
    }
}

async fn run_host(args: &ArgMatches, env_vars: HashMap<String, String>) -> Result<(), Box<dyn Error>> {
    let config = HostConfig::load(env_vars.clone())?;
    let owner = args
        .get_one::<String>("owner")
        .cloned()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let management = RetryingManagement::new(static_management(args)?);

    info!(%owner, ?config, "Starting processor host");
    if is_jetstream(args) {
        let (leases, checkpoints) = kv_stores(args, env_vars).await?;
        start_host(
            KVLeaser::new(leases, &owner, config.lease_duration),
            KVCheckpointer::new(checkpoints, &owner),
            management,
            config,
        )
        .await
    } else {
        start_host(
            InMemoryLeaser::new(&owner, config.lease_duration),
            InMemoryCheckpointer::new(&owner),
            management,
            config,
        )
        .await
    }
}

async fn start_host<L, C, M>(
    leaser: L,
    checkpointer: C,
    management: M,
    config: HostConfig,
) -> Result<(), Box<dyn Error>>
where
    L: Leaser,
    C: Checkpointer,
    M: Management,
{
    let (host, mut events) = EventProcessorHost::new(leaser, checkpointer, management, config);

    let cancel = CancellationToken::new();
    let shutdown_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                OwnershipEvent::Acquired { lease, checkpoint } => info!(
                    partition_id = %lease.partition_id,
                    epoch = lease.epoch,
                    sequence_number = checkpoint.sequence_number,
                    offset = %checkpoint.offset,
                    "Partition acquired"
                ),
                OwnershipEvent::Lost { partition_id } => {
                    info!(%partition_id, "Partition lost")
                }
            }
        }
    });

    let result = host.run(cancel).await;

    // closes the event channel
    drop(host);
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }
    event_logger.await?;

    result.map_err(Into::into)
}

async fn reset_stores(
    args: &ArgMatches,
    env_vars: HashMap<String, String>,
) -> Result<(), Box<dyn Error>> {
    if !is_jetstream(args) {
        info!("In-memory stores live only as long as the host, nothing to reset");
        return Ok(());
    }

    let config = HostConfig::load(env_vars.clone())?;
    let (leases, checkpoints) = kv_stores(args, env_vars).await?;
    let cancel = CancellationToken::new();

    KVLeaser::new(leases, "reset", config.lease_duration)
        .delete_store(cancel.clone())
        .await?;
    KVCheckpointer::new(checkpoints, "reset")
        .delete_store(cancel)
        .await?;
    Ok(())
}

fn is_jetstream(args: &ArgMatches) -> bool {
    args.get_one::<String>("store")
        .is_some_and(|store| store == cmdline::STORE_JETSTREAM)
}

/// The lease and the checkpoint buckets.
async fn kv_stores(
    args: &ArgMatches,
    env_vars: HashMap<String, String>,
) -> Result<(Arc<dyn KVStore>, Arc<dyn KVStore>), Box<dyn Error>> {
    let prefix = args
        .get_one::<String>("bucket-prefix")
        .map_or("eventhost", String::as_str);

    let context = create_js_context(ClientConfig::load(env_vars)?).await?;
    let leases: Arc<dyn KVStore> = Arc::new(JetstreamKVStore::new(
        context.clone(),
        format!("{prefix}_leases"),
    ));
    let checkpoints: Arc<dyn KVStore> =
        Arc::new(JetstreamKVStore::new(context, format!("{prefix}_checkpoints")));
    Ok((leases, checkpoints))
}

fn static_management(args: &ArgMatches) -> Result<StaticManagement, Box<dyn Error>> {
    if let Some(path) = args.get_one::<PathBuf>("runtime-info") {
        return Ok(StaticManagement::load(path)?);
    }

    let hub = args.get_one::<String>("hub").map_or("eventhost", String::as_str);
    let partitions: Vec<String> = args
        .get_many::<String>("partitions")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    Ok(StaticManagement::new(hub, partitions))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install the terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
