//! Container executor - runs shards in containers

use crate::cleanup::{CleanupController, CleanupOutcome};
use crate::error::{ExecutorError, Result};
use crate::executor::Executor;
use crate::job::{job_environment, json_with_max, shard_storage_specs, JobShard};
use crate::labels::ObjectNaming;
use crate::mounts::build_mounts;
use crate::resources::translate;
use crate::result::{write_job_results, RunFault, RunResult, UNKNOWN_EXIT_CODE};
use crate::runtime::{ContainerRuntime, ContainerSpec, ExitStatus, LogChunk, RuntimeError};
use crate::state::{ShardState, ShardStates};
use crate::storage::{parallel_prepare_storage, StorageProvider, StorageSpec};
use async_trait::async_trait;
use futures::StreamExt;
use shard_foundation::NodeConfig;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Start errors containing this are the workload's fault, not the node's
const EXECUTABLE_NOT_FOUND: &str = "executable file not found";

/// Behavior toggles and limits for [`ContainerExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub skip_image_pull: bool,
    pub keep_stack: bool,
    pub cleanup_timeout: Duration,
    pub max_parallel_prepare: usize,
    pub max_job_spec_bytes: usize,
    pub max_output_capture_bytes: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            skip_image_pull: config.skip_image_pull,
            keep_stack: config.keep_stack,
            cleanup_timeout: config.cleanup_timeout(),
            max_parallel_prepare: config.max_parallel_prepare,
            max_job_spec_bytes: config.max_job_spec_bytes,
            max_output_capture_bytes: config.max_output_capture_bytes,
        }
    }
}

#[derive(Debug, Default)]
struct CapturedLogs {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    error: Option<String>,
}

/// Container executor that runs shards through a [`ContainerRuntime`]
pub struct ContainerExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    storage: Arc<dyn StorageProvider>,
    naming: ObjectNaming,
    cleanup: CleanupController,
    settings: ExecutorSettings,

    states: ShardStates,
}

impl ContainerExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        storage: Arc<dyn StorageProvider>,
        executor_id: &str,
        settings: ExecutorSettings,
    ) -> Result<Self> {
        let naming = ObjectNaming::new(executor_id)?;
        let cleanup = CleanupController::new(
            runtime.clone(),
            naming.clone(),
            settings.keep_stack,
            settings.cleanup_timeout,
        );

        Ok(Self {
            runtime,
            storage,
            naming,
            cleanup,
            settings,
            states: ShardStates::default(),
        })
    }

    pub fn naming(&self) -> &ObjectNaming {
        &self.naming
    }

    pub fn cleanup(&self) -> &CleanupController {
        &self.cleanup
    }

    pub fn shard_state(&self, shard: &JobShard) -> Option<ShardState> {
        self.states.get(&shard.id())
    }

    /// Remove everything this executor instance owns (process shutdown)
    pub async fn cleanup_all(&self) -> CleanupOutcome {
        self.cleanup.cleanup_all().await
    }

    fn set_state(&self, shard: &JobShard, next: ShardState) {
        let id = shard.id();
        debug!(shard = %id, state = %next, "Shard state changed");
        if let Some(previous) = self.states.set(&id, next.clone()) {
            if !previous.can_transition_to(&next) {
                warn!(shard = %id, from = %previous, to = %next, "Unexpected shard state transition");
            }
        }
    }

    /// Preparing -> Created -> Running -> Awaiting, then collect results
    async fn execute(
        &self,
        shard: &JobShard,
        results_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        self.set_state(shard, ShardState::Preparing);
        let spec = &shard.job.spec;

        shard.validate()?;
        let limits = translate(&spec.resources.parse()?);
        let job_spec_json = json_with_max(spec, self.settings.max_job_spec_bytes)?;
        check_cancelled(cancel)?;

        let storage_specs = shard_storage_specs(shard)?;
        let inputs = unless_cancelled(cancel, async {
            parallel_prepare_storage(
                self.storage.as_ref(),
                storage_specs,
                self.settings.max_parallel_prepare,
            )
            .await
            .map_err(ExecutorError::from)
        })
        .await?;

        tokio::fs::create_dir_all(results_dir).await?;
        let mounts = build_mounts(&inputs, &spec.outputs, results_dir)?;

        let image = &spec.docker.image;
        if self.settings.skip_image_pull {
            debug!(%image, "Skipping image pull");
        } else {
            unless_cancelled(cancel, async {
                self.runtime
                    .pull_image(image)
                    .await
                    .map_err(|source| ExecutorError::ImagePull {
                        image: image.clone(),
                        source,
                    })
            })
            .await?;
        }

        let container_spec = ContainerSpec {
            image: image.clone(),
            entrypoint: spec.docker.entrypoint.clone(),
            env: job_environment(&spec.docker.environment_variables, &job_spec_json),
            working_dir: spec.docker.working_directory.clone(),
            labels: self.naming.labels(shard),
            mounts,
            limits,
            network_mode: spec.network.runtime_mode().to_string(),
        };
        let name = self.naming.container_name(shard);
        // An abandoned create may still land; cleanup finds it by label.
        let container_id = unless_cancelled(cancel, async {
            self.runtime
                .create_container(&name, &container_spec)
                .await
                .map_err(ExecutorError::CreateContainer)
        })
        .await?;
        self.cleanup.record(shard, &container_id);
        self.set_state(shard, ShardState::Created);
        info!(container = %container_id, %name, "Created container");

        unless_cancelled(cancel, async {
            self.runtime
                .start_container(&container_id)
                .await
                .map_err(classify_start_error)
        })
        .await?;
        self.set_state(shard, ShardState::Running);

        self.set_state(shard, ShardState::Awaiting);
        let stop_logs = cancel.child_token();
        let (logs, exit) = tokio::join!(self.capture_logs(&container_id, &stop_logs), async {
            let exit = self.await_exit(&container_id, spec.timeout(), cancel).await;
            if exit.is_err() {
                stop_logs.cancel();
            }
            exit
        });

        let mut faults = Vec::new();
        let exit_code = match exit {
            Ok(status) => {
                if let Some(message) = status.error {
                    faults.push(RunFault::Runtime(message));
                }
                status.code
            }
            Err(fault) => {
                faults.push(fault);
                UNKNOWN_EXIT_CODE
            }
        };
        if let Some(message) = logs.error {
            faults.push(RunFault::Logs(message));
        }

        Ok(write_job_results(
            results_dir,
            &logs.stdout,
            &logs.stderr,
            exit_code,
            faults,
            self.settings.max_output_capture_bytes,
        )
        .await)
    }

    /// Follow logs until the stream ends, fails or `stop` fires
    async fn capture_logs(&self, container_id: &str, stop: &CancellationToken) -> CapturedLogs {
        let mut logs = self.runtime.follow_logs(container_id);
        let mut captured = CapturedLogs::default();
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                item = logs.next() => match item {
                    Some(Ok(LogChunk::Stdout(bytes))) => captured.stdout.extend_from_slice(&bytes),
                    Some(Ok(LogChunk::Stderr(bytes))) => captured.stderr.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        warn!(container = %container_id, error = %e, "Log follow failed");
                        captured.error = Some(e.to_string());
                        break;
                    }
                    None => break,
                },
            }
        }
        captured
    }

    /// Whichever comes first: exit status, wait error, cancellation, timeout
    async fn await_exit(
        &self,
        container_id: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> std::result::Result<ExitStatus, RunFault> {
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = self.runtime.wait_container(container_id) => {
                status.map_err(|e| RunFault::Wait(e.to_string()))
            }
            _ = cancel.cancelled() => Err(RunFault::Cancelled),
            _ = deadline => Err(RunFault::TimedOut(timeout.map_or(0, |d| d.as_secs()))),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ExecutorError::Cancelled);
    }
    Ok(())
}

/// Drive `step` unless `cancel` fires first; an already cancelled token wins
async fn unless_cancelled<T, F>(cancel: &CancellationToken, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        result = step => result,
    }
}

fn classify_start_error(err: RuntimeError) -> ExecutorError {
    if err.to_string().contains(EXECUTABLE_NOT_FOUND) {
        ExecutorError::ExecutableNotFound(err)
    } else {
        ExecutorError::StartContainer(err)
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    fn name(&self) -> &'static str {
        self.runtime.name()
    }

    async fn is_installed(&self) -> Result<bool> {
        match self.runtime.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(error = %e, "Container runtime not reachable");
                Ok(false)
            }
        }
    }

    async fn has_storage_locally(&self, spec: &StorageSpec) -> Result<bool> {
        let storage = self.storage.get_storage(spec.storage_source).await?;
        Ok(storage.has_storage_locally(spec).await?)
    }

    async fn get_volume_size(&self, spec: &StorageSpec) -> Result<u64> {
        let storage = self.storage.get_storage(spec.storage_source).await?;
        Ok(storage.get_volume_size(spec).await?)
    }

    async fn run_shard(
        &self,
        shard: &JobShard,
        results_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let span = info_span!(
            "run_shard",
            shard = %shard.id(),
            executor = %self.naming.executor_id(),
        );

        async move {
            info!(image = %shard.job.spec.docker.image, "Running shard");
            self.states.reset(&shard.id());
            let outcome = self.execute(shard, results_dir, cancel).await;

            match &outcome {
                Ok(result) => match result.combined_error() {
                    Some(error) => {
                        warn!(exit_code = result.exit_code, %error, "Shard finished with errors");
                        self.set_state(shard, ShardState::Failed(error));
                    }
                    None => {
                        info!(exit_code = result.exit_code, "Shard finished");
                        self.set_state(shard, ShardState::Terminated(result.exit_code));
                    }
                },
                Err(e) => {
                    warn!(error = %e, user_facing = e.is_user_facing(), "Shard failed");
                    self.set_state(shard, ShardState::Failed(e.to_string()));
                }
            }

            self.cleanup.cleanup_shard(shard).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn cancel_shard(&self, shard: &JobShard) -> CleanupOutcome {
        info!(shard = %shard.id(), "Cancelling shard");
        self.cleanup.cleanup_shard(shard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_start_error() {
        let err = classify_start_error(RuntimeError::Api(
            "OCI runtime create failed: exec: \"nope\": executable file not found in $PATH".into(),
        ));
        assert!(matches!(err, ExecutorError::ExecutableNotFound(_)));
        assert!(err.to_string().starts_with("Executable file not found"));

        let err = classify_start_error(RuntimeError::Api("port already allocated".into()));
        assert!(matches!(err, ExecutorError::StartContainer(_)));
        assert_eq!(err.to_string(), "failed to start container: port already allocated");
    }

    #[test]
    fn test_settings_from_config() {
        let config = NodeConfig {
            skip_image_pull: true,
            max_parallel_prepare: 8,
            ..NodeConfig::default()
        };
        let settings = ExecutorSettings::from_config(&config);
        assert!(settings.skip_image_pull);
        assert!(!settings.keep_stack);
        assert_eq!(settings.max_parallel_prepare, 8);
        assert_eq!(settings.cleanup_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_unless_cancelled_abandons_stuck_step() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome =
            unless_cancelled(&token, std::future::pending::<Result<()>>()).await;
        assert!(matches!(outcome, Err(ExecutorError::Cancelled)));

        let done = unless_cancelled(&CancellationToken::new(), async { Ok(7) }).await;
        assert_eq!(done.unwrap(), 7);
    }

    #[test]
    fn test_check_cancelled() {
        let token = CancellationToken::new();
        assert!(check_cancelled(&token).is_ok());
        token.cancel();
        assert!(matches!(check_cancelled(&token), Err(ExecutorError::Cancelled)));
    }
}
