//! ShardNode CLI - Main entry point

mod node;
mod shutdown;

use clap::{Parser, Subcommand};
use shard_foundation::NodeConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ShardNode - run job shards in containers on this host
#[derive(Parser, Debug)]
#[command(name = "shardnode")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more shards and print their results
    Run {
        /// Shard description (JSON); repeat to run several concurrently
        #[arg(short, long = "shard", required = true)]
        shards: Vec<PathBuf>,

        /// Results root (defaults to the configured one)
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Use the local image without pulling
        #[arg(long)]
        skip_pull: bool,

        /// Keep containers afterwards for debugging
        #[arg(long)]
        keep_stack: bool,

        /// Remove leftovers of an earlier run of this executor first
        #[arg(long)]
        reconcile: bool,
    },
    /// Remove every container and network this executor owns
    Cleanup,
    /// Show the node configuration and check the runtime
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = NodeConfig::load()?;

    match args.command {
        Command::Run {
            shards,
            results,
            skip_pull,
            keep_stack,
            reconcile,
        } => {
            config.skip_image_pull |= skip_pull;
            config.keep_stack |= keep_stack;
            let node = node::Node::connect(config)?;
            let shutdown = shutdown::install_shutdown_handler();
            node::run(&node, &shards, results, reconcile, shutdown).await
        }
        Command::Cleanup => node::cleanup(&node::Node::connect(config)?).await,
        Command::Check => node::check(&node::Node::connect(config)?).await,
    }
}
