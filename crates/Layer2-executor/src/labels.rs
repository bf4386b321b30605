//! Object naming and ownership labels
//!
//! Every runtime object created for a shard carries two labels: one naming
//! the executor instance, one naming the (executor, shard) pair. Cleanup
//! finds objects through these labels alone.

use crate::error::{ExecutorError, Result};
use crate::job::JobShard;
use shard_foundation::validate_executor_id;
use std::collections::HashMap;

pub const NAME_PREFIX: &str = "shardnode";
pub const LABEL_EXECUTOR: &str = "shardnode-executor";
pub const LABEL_JOB: &str = "shardnode-job";

/// Role of the shard's workload container
pub const ROLE_EXECUTOR: &str = "executor";

/// Derives names and labels for one executor instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNaming {
    executor_id: String,
}

impl ObjectNaming {
    pub fn new(executor_id: impl Into<String>) -> Result<Self> {
        let executor_id = executor_id.into();
        validate_executor_id(&executor_id).map_err(|e| ExecutorError::validation(e.to_string()))?;
        Ok(Self { executor_id })
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// `{prefix}-{executor}_{job}-{index}-{role}`
    ///
    /// Executor IDs never contain `_`, so the first one ends the executor ID.
    pub fn object_name(&self, shard: &JobShard, role: &str) -> String {
        format!(
            "{}-{}_{}-{}-{}",
            NAME_PREFIX, self.executor_id, shard.job.id, shard.index, role
        )
    }

    pub fn container_name(&self, shard: &JobShard) -> String {
        self.object_name(shard, ROLE_EXECUTOR)
    }

    /// Executor ID joined to the shard's identity
    pub fn job_label_value(&self, shard: &JobShard) -> String {
        format!("{}_{}", self.executor_id, shard.id())
    }

    pub fn labels(&self, shard: &JobShard) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_EXECUTOR.to_string(), self.executor_id.clone()),
            (LABEL_JOB.to_string(), self.job_label_value(shard)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DockerSpec, Job, JobSpec};

    fn shard(job_id: &str, index: u32) -> JobShard {
        JobShard::new(
            Job {
                id: job_id.into(),
                spec: JobSpec {
                    docker: DockerSpec {
                        image: "alpine".into(),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            },
            index,
        )
    }

    #[test]
    fn test_name_format() {
        let naming = ObjectNaming::new("node-a").unwrap();
        assert_eq!(
            naming.container_name(&shard("job1", 2)),
            "shardnode-node-a_job1-2-executor"
        );
        assert_eq!(naming.job_label_value(&shard("job1", 2)), "node-a_job1:2");
    }

    #[test]
    fn test_labels_are_deterministic() {
        let naming = ObjectNaming::new("node-a").unwrap();
        let s = shard("job1", 0);
        assert_eq!(naming.labels(&s), naming.labels(&s.clone()));
        assert_eq!(naming.container_name(&s), naming.container_name(&s));
        assert_eq!(naming.labels(&s)[LABEL_EXECUTOR], "node-a");
    }

    #[test]
    fn test_distinct_pairs_never_collide() {
        let executors = ["node-a", "node-b", "node.a", "node"];
        let shards = [
            shard("job1", 0),
            shard("job1", 1),
            shard("job2", 0),
            shard("job_1", 0),
            shard("job1", 10),
            shard("a-job1", 0),
            shard("job1-1", 0),
        ];

        let mut names = std::collections::HashSet::new();
        let mut labels = std::collections::HashSet::new();
        for executor in executors {
            let naming = ObjectNaming::new(executor).unwrap();
            for s in &shards {
                assert!(names.insert(naming.container_name(s)));
                assert!(labels.insert(naming.job_label_value(s)));
            }
        }
    }

    #[test]
    fn test_dashes_in_both_ids_stay_distinct() {
        let left = ObjectNaming::new("node-a").unwrap().container_name(&shard("x", 0));
        let right = ObjectNaming::new("node").unwrap().container_name(&shard("a-x", 0));
        assert_ne!(left, right);
        assert_eq!(left, "shardnode-node-a_x-0-executor");
        assert_eq!(right, "shardnode-node_a-x-0-executor");
    }

    #[test]
    fn test_invalid_executor_id() {
        assert!(ObjectNaming::new("").is_err());
        assert!(ObjectNaming::new("has_underscore").is_err());
        assert!(ObjectNaming::new("has space").is_err());
    }
}
