//! Cleanup controller
//!
//! Removes the runtime objects a shard or a whole executor instance created.
//! Objects are found through the in-memory [`ObjectIndex`] first and then by
//! label, so anything left behind by an earlier process is still reachable.
//!
//! Cleanup never fails its caller. Each pass runs under its own deadline and
//! reports a [`CleanupOutcome`] that is also logged.

use crate::job::JobShard;
use crate::labels::{ObjectNaming, LABEL_EXECUTOR, LABEL_JOB};
use crate::runtime::{ContainerRuntime, ObjectKind, RuntimeError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

// ============================================================================
// Object index
// ============================================================================

/// Job label value -> container IDs created under it
#[derive(Debug, Default)]
pub struct ObjectIndex {
    objects: Mutex<HashMap<String, Vec<String>>>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, job_label: &str, id: impl Into<String>) {
        self.objects
            .lock()
            .entry(job_label.to_string())
            .or_default()
            .push(id.into());
    }

    /// Remove and return everything recorded under `job_label`
    pub fn take(&self, job_label: &str) -> Vec<String> {
        self.objects.lock().remove(job_label).unwrap_or_default()
    }

    pub fn contains(&self, job_label: &str) -> bool {
        self.objects.lock().contains_key(job_label)
    }

    pub fn clear(&self) {
        self.objects.lock().clear();
    }
}

// ============================================================================
// Outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// This many objects were removed (possibly zero)
    Removed(usize),
    /// Cleanup is disabled by `keep_stack`
    Skipped,
    /// The executor-wide sweep already ran in this process
    AlreadySwept,
    /// Best-effort removal failed; the message lists every fault
    Failed(String),
}

impl std::fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupOutcome::Removed(n) => write!(f, "removed {} object(s)", n),
            CleanupOutcome::Skipped => write!(f, "skipped (keep stack)"),
            CleanupOutcome::AlreadySwept => write!(f, "already swept"),
            CleanupOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct CleanupController {
    runtime: Arc<dyn ContainerRuntime>,
    naming: ObjectNaming,
    index: ObjectIndex,
    keep_stack: bool,
    timeout: Duration,
    swept: AtomicBool,
}

impl CleanupController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        naming: ObjectNaming,
        keep_stack: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            naming,
            index: ObjectIndex::new(),
            keep_stack,
            timeout,
            swept: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> &ObjectIndex {
        &self.index
    }

    /// Remember a container created for `shard`
    pub fn record(&self, shard: &JobShard, container_id: &str) {
        self.index
            .record(&self.naming.job_label_value(shard), container_id);
    }

    /// Remove every object belonging to `shard`. Safe to call repeatedly and
    /// for shards that never created anything.
    pub async fn cleanup_shard(&self, shard: &JobShard) -> CleanupOutcome {
        let label = self.naming.job_label_value(shard);
        if self.keep_stack {
            info!(shard = %shard.id(), "Keeping shard containers (keep stack enabled)");
            return CleanupOutcome::Skipped;
        }

        let ids = self.index.take(&label);
        let runtime = self.runtime.clone();
        let outcome = self
            .bounded(async move {
                let mut removed = 0;
                let mut failures = Vec::new();
                for id in ids {
                    match runtime.remove_object(ObjectKind::Container, &id).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.is_not_found() => {}
                        Err(e) => failures.push(format!("container {}: {}", id, e)),
                    }
                }
                match runtime.remove_by_label(LABEL_JOB, &label).await {
                    Ok(n) => removed += n,
                    Err(e) => failures.push(e.to_string()),
                }
                if failures.is_empty() {
                    Ok(removed)
                } else {
                    Err(RuntimeError::Api(failures.join("; ")))
                }
            })
            .await;

        log_outcome("shard", &shard.id(), &outcome);
        outcome
    }

    /// Remove every object this executor instance owns. Runs at most once.
    pub async fn cleanup_all(&self) -> CleanupOutcome {
        if self.swept.swap(true, Ordering::SeqCst) {
            return CleanupOutcome::AlreadySwept;
        }
        if self.keep_stack {
            info!(executor = %self.naming.executor_id(), "Keeping executor containers (keep stack enabled)");
            return CleanupOutcome::Skipped;
        }

        let runtime = self.runtime.clone();
        let executor_id = self.naming.executor_id().to_string();
        let outcome = self
            .bounded(async move { runtime.remove_by_label(LABEL_EXECUTOR, &executor_id).await })
            .await;
        self.index.clear();

        log_outcome("executor", self.naming.executor_id(), &outcome);
        outcome
    }

    /// Remove objects labeled with this executor whose shard is not known to
    /// this process, i.e. leftovers from a previous run.
    pub async fn reconcile_orphans(&self) -> CleanupOutcome {
        if self.keep_stack {
            return CleanupOutcome::Skipped;
        }

        let runtime = self.runtime.clone();
        let executor_id = self.naming.executor_id().to_string();
        let index = &self.index;
        let outcome = self
            .bounded(async move {
                let objects = runtime.list_objects(LABEL_EXECUTOR, &executor_id).await?;
                let mut removed = 0;
                let mut failures = Vec::new();
                for object in objects {
                    let owned = object
                        .labels
                        .get(LABEL_JOB)
                        .is_some_and(|label| index.contains(label));
                    if owned {
                        continue;
                    }
                    match runtime.remove_object(object.kind, &object.id).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.is_not_found() => {}
                        Err(e) => failures.push(format!("{} {}: {}", object.kind, object.id, e)),
                    }
                }
                if failures.is_empty() {
                    Ok(removed)
                } else {
                    Err(RuntimeError::Api(failures.join("; ")))
                }
            })
            .await;

        log_outcome("orphans", self.naming.executor_id(), &outcome);
        outcome
    }

    /// Run under the cleanup deadline, independent of any caller cancellation
    async fn bounded<F>(&self, work: F) -> CleanupOutcome
    where
        F: Future<Output = Result<usize, RuntimeError>>,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(removed)) => CleanupOutcome::Removed(removed),
            Ok(Err(e)) => CleanupOutcome::Failed(e.to_string()),
            Err(_) => CleanupOutcome::Failed(format!("timed out after {:?}", self.timeout)),
        }
    }
}

fn log_outcome(scope: &str, owner: &str, outcome: &CleanupOutcome) {
    match outcome {
        CleanupOutcome::Failed(reason) => {
            error!(scope, owner, %reason, "Cleanup failed");
        }
        other => debug!(scope, owner, outcome = %other, "Cleanup finished"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_take_empties_entry() {
        let index = ObjectIndex::new();
        index.record("exec_job:0", "c1");
        index.record("exec_job:0", "c2");
        index.record("exec_job:1", "c3");

        assert_eq!(index.take("exec_job:0"), vec!["c1", "c2"]);
        assert!(index.take("exec_job:0").is_empty());
        assert!(index.contains("exec_job:1"));

        index.clear();
        assert!(!index.contains("exec_job:1"));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CleanupOutcome::Removed(2).to_string(), "removed 2 object(s)");
        assert_eq!(CleanupOutcome::Skipped.to_string(), "skipped (keep stack)");
        assert_eq!(CleanupOutcome::Failed("x".into()).to_string(), "failed: x");
    }
}
