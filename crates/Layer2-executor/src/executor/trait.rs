//! Executor trait

use crate::cleanup::CleanupOutcome;
use crate::error::Result;
use crate::job::JobShard;
use crate::result::RunResult;
use crate::storage::StorageSpec;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Executor trait - implement to add new execution backends
#[async_trait]
pub trait Executor: Send + Sync {
    /// Get executor name
    fn name(&self) -> &'static str;

    /// Whether the backing runtime is reachable
    async fn is_installed(&self) -> Result<bool>;

    async fn has_storage_locally(&self, spec: &StorageSpec) -> Result<bool>;

    /// Size in bytes of the data behind `spec`
    async fn get_volume_size(&self, spec: &StorageSpec) -> Result<u64>;

    /// Run one shard to completion, writing results under `results_dir`.
    ///
    /// Failures before the workload starts are returned as errors; anything
    /// after that is reported inside the [`RunResult`].
    async fn run_shard(
        &self,
        shard: &JobShard,
        results_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunResult>;

    /// Cancel a shard by removing everything it created
    async fn cancel_shard(&self, shard: &JobShard) -> CleanupOutcome;
}
