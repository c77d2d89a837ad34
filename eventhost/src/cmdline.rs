use clap::{Arg, ArgAction, ArgGroup, Command};

pub(super) const STORE_MEMORY: &str = "memory";
pub(super) const STORE_JETSTREAM: &str = "jetstream";

pub(super) fn root_cli() -> Command {
    Command::new("eventhost")
        .about("Partition lease and checkpoint coordination for event stream processors")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
        .subcommand(add_reset_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run")
        .about("Run a processor host until interrupted")
        .arg(store_arg())
        .arg(bucket_prefix_arg())
        .arg(
            Arg::new("owner")
                .long("owner")
                .help("Host identity, a random one is generated when absent")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("runtime-info")
                .long("runtime-info")
                .help("JSON snapshot of the hub and partition runtime information")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(std::path::PathBuf)),
        )
        .arg(
            Arg::new("hub")
                .long("hub")
                .help("Hub name when the partitions are given on the command line")
                .default_value("eventhost"),
        )
        .arg(
            Arg::new("partitions")
                .long("partitions")
                .help("Partition ids of the hub")
                .num_args(1..)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .group(
            ArgGroup::new("source")
                .args(["runtime-info", "partitions"])
                .required(true),
        )
}

fn add_reset_subcommand() -> Command {
    Command::new("reset")
        .about("Delete the lease and checkpoint stores")
        .arg(store_arg())
        .arg(bucket_prefix_arg())
}

fn store_arg() -> Arg {
    Arg::new("store")
        .long("store")
        .help("Backing store of leases and checkpoints")
        .value_parser([STORE_MEMORY, STORE_JETSTREAM])
        .default_value(STORE_MEMORY)
}

fn bucket_prefix_arg() -> Arg {
    Arg::new("bucket-prefix")
        .long("bucket-prefix")
        .help("Prefix of the KV buckets, <prefix>_leases and <prefix>_checkpoints")
        .default_value("eventhost")
}
