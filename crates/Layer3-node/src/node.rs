//! Node wiring and subcommands

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use shard_executor::{
    CleanupOutcome, ContainerExecutor, ContainerRuntime, DockerRuntime, Executor,
    ExecutorSettings, JobShard, LocalDirectoryStorage, MappedStorageProvider, StorageSourceType,
};
use shard_foundation::NodeConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Executor plus the config it was built from
pub struct Node {
    config: NodeConfig,
    executor: Arc<ContainerExecutor>,
}

impl Node {
    /// Connect to the runtime and build the executor
    pub fn connect(config: NodeConfig) -> Result<Self> {
        let executor_id = config
            .executor_id
            .clone()
            .context("node config has no executor id")?;

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(
            DockerRuntime::connect(config.docker_host.as_deref())
                .context("failed to connect to docker")?,
        );
        let storage = MappedStorageProvider::new().with_storage(
            StorageSourceType::LocalDirectory,
            Arc::new(LocalDirectoryStorage::new()),
        );

        let executor = ContainerExecutor::new(
            runtime,
            Arc::new(storage),
            &executor_id,
            ExecutorSettings::from_config(&config),
        )?;

        Ok(Self {
            config,
            executor: Arc::new(executor),
        })
    }

    pub fn executor(&self) -> &Arc<ContainerExecutor> {
        &self.executor
    }

    async fn ensure_installed(&self) -> Result<()> {
        if !self.executor.is_installed().await? {
            bail!("container runtime is not reachable");
        }
        Ok(())
    }
}

/// Read a shard description (JSON) from disk
pub fn load_shard(path: &Path) -> Result<JobShard> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read shard file {}", path.display()))?;
    let shard: JobShard = serde_json::from_str(&content)
        .with_context(|| format!("invalid shard file {}", path.display()))?;
    Ok(shard)
}

/// `{root}/{job_id}/{index}`
pub fn shard_results_dir(root: &Path, shard: &JobShard) -> PathBuf {
    root.join(&shard.job.id).join(shard.index.to_string())
}

/// Run every shard concurrently, print each result, then sweep once
pub async fn run(
    node: &Node,
    shard_files: &[PathBuf],
    results_root: Option<PathBuf>,
    reconcile: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let shards = shard_files
        .iter()
        .map(|path| load_shard(path))
        .collect::<Result<Vec<_>>>()?;

    node.ensure_installed().await?;
    if reconcile {
        let outcome = node.executor.cleanup().reconcile_orphans().await;
        info!(%outcome, "Reconciled orphaned objects");
    }

    let root = results_root.unwrap_or_else(|| node.config.results_root.clone());
    let runs = shards.iter().map(|shard| {
        let dir = shard_results_dir(&root, shard);
        let executor = node.executor.clone();
        let token = shutdown.child_token();
        async move {
            let outcome = executor.run_shard(shard, &dir, &token).await;
            (shard, outcome)
        }
    });
    let outcomes = join_all(runs).await;

    let mut failed = 0;
    for (shard, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                if !result.is_success() {
                    failed += 1;
                }
            }
            Err(e) => {
                error!(shard = %shard.id(), "{}", e);
                eprintln!("shard {} failed: {}", shard.id(), e);
                failed += 1;
            }
        }
    }

    shutdown_sweep(&node.executor).await;

    if failed > 0 {
        bail!("{} of {} shard(s) did not succeed", failed, shards.len());
    }
    Ok(())
}

/// Remove every object this executor owns
pub async fn cleanup(node: &Node) -> Result<()> {
    node.ensure_installed().await?;
    match node.executor.cleanup_all().await {
        CleanupOutcome::Failed(reason) => bail!("cleanup failed: {}", reason),
        outcome => {
            println!("{}", outcome);
            Ok(())
        }
    }
}

/// Report config and runtime reachability
pub async fn check(node: &Node) -> Result<()> {
    let executor = &node.executor;
    println!("executor id:   {}", executor.naming().executor_id());
    println!("results root:  {}", node.config.results_root.display());
    println!("skip pull:     {}", node.config.skip_image_pull);
    println!("keep stack:    {}", node.config.keep_stack);

    if executor.is_installed().await? {
        println!("runtime:       {} (reachable)", executor.name());
        Ok(())
    } else {
        bail!("runtime {} is not reachable", executor.name())
    }
}

async fn shutdown_sweep(executor: &ContainerExecutor) {
    match executor.cleanup_all().await {
        CleanupOutcome::Failed(reason) => warn!(%reason, "Shutdown sweep failed"),
        outcome => info!(%outcome, "Shutdown sweep finished"),
    }
}
