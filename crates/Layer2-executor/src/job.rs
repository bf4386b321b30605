//! Job and shard definitions

use crate::error::{ExecutorError, Result};
use crate::resources::ResourceUsageConfig;
use crate::storage::StorageSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reserved environment variable carrying the job spec as JSON
pub const JOB_SPEC_ENV: &str = "SHARDNODE_JOB_SPEC";

/// Container workload definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerSpec {
    /// Image reference
    pub image: String,

    /// Entrypoint override; image default when empty
    #[serde(default)]
    pub entrypoint: Vec<String>,

    /// `KEY=value` entries
    #[serde(default)]
    pub environment_variables: Vec<String>,

    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Network access granted to the container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkMode {
    /// No network access
    #[default]
    None,
    /// Default bridge network
    Full,
}

impl NetworkMode {
    /// Name of the runtime network mode
    pub fn runtime_mode(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
            NetworkMode::Full => "bridge",
        }
    }
}

/// How a job's inputs are split across shards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingConfig {
    /// Only inputs whose container path matches are sharded; empty matches all
    #[serde(default)]
    pub glob_pattern: String,

    /// Inputs per shard; 0 puts every input in one shard
    #[serde(default)]
    pub batch_size: usize,
}

/// Everything needed to run a job's shards
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub docker: DockerSpec,

    #[serde(default)]
    pub resources: ResourceUsageConfig,

    #[serde(default)]
    pub network: NetworkMode,

    /// Seconds before the container is abandoned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Inputs every shard receives
    #[serde(default)]
    pub contexts: Vec<StorageSpec>,

    /// Inputs split across shards
    #[serde(default)]
    pub inputs: Vec<StorageSpec>,

    #[serde(default)]
    pub outputs: Vec<StorageSpec>,

    #[serde(default)]
    pub sharding: ShardingConfig,
}

impl JobSpec {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// A submitted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub spec: JobSpec,
}

/// One unit of a job's work, dispatched to exactly one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobShard {
    pub job: Job,
    pub index: u32,
}

impl JobShard {
    pub fn new(job: Job, index: u32) -> Self {
        Self { job, index }
    }

    /// Stable shard identity, unique across jobs
    pub fn id(&self) -> String {
        format!("{}:{}", self.job.id, self.index)
    }

    /// Checks that must pass before anything is created for the shard
    pub fn validate(&self) -> Result<()> {
        let id = &self.job.id;
        if id.is_empty() {
            return Err(ExecutorError::validation("job id must not be empty"));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(ExecutorError::validation(format!(
                "job id {:?} contains invalid character {:?}",
                id, c
            )));
        }
        if self.job.spec.docker.image.trim().is_empty() {
            return Err(ExecutorError::validation(format!(
                "job {} has no container image",
                id
            )));
        }
        Ok(())
    }
}

/// Storage specs this shard mounts: every context, then its slice of the inputs
pub fn shard_storage_specs(shard: &JobShard) -> Result<Vec<StorageSpec>> {
    let spec = &shard.job.spec;
    let mut specs = spec.contexts.clone();
    specs.extend(shard_inputs(spec, shard.index)?);
    Ok(specs)
}

fn shard_inputs(spec: &JobSpec, index: u32) -> Result<Vec<StorageSpec>> {
    let sharding = &spec.sharding;
    let matching: Vec<StorageSpec> = if sharding.glob_pattern.is_empty() {
        spec.inputs.clone()
    } else {
        let pattern = glob::Pattern::new(&sharding.glob_pattern).map_err(|e| {
            ExecutorError::validation(format!(
                "invalid sharding glob pattern {:?}: {}",
                sharding.glob_pattern, e
            ))
        })?;
        spec.inputs
            .iter()
            .filter(|input| pattern.matches(&input.path))
            .cloned()
            .collect()
    };

    if sharding.batch_size == 0 {
        return Ok(if index == 0 { matching } else { Vec::new() });
    }

    Ok(matching
        .chunks(sharding.batch_size)
        .nth(index as usize)
        .map(|batch| batch.to_vec())
        .unwrap_or_default())
}

/// Serialize to JSON, refusing documents larger than `max_bytes`
pub fn json_with_max<T: Serialize>(value: &T, max_bytes: usize) -> Result<String> {
    let json = serde_json::to_string(value)?;
    if json.len() > max_bytes {
        return Err(ExecutorError::JobSpec(format!(
            "serialized job spec is {} bytes, limit is {}",
            json.len(),
            max_bytes
        )));
    }
    Ok(json)
}

/// User environment plus the reserved job spec variable, which replaces any
/// user entry with the same key
pub fn job_environment(user_env: &[String], job_spec_json: &str) -> Vec<String> {
    let reserved_prefix = format!("{}=", JOB_SPEC_ENV);
    let mut env: Vec<String> = user_env
        .iter()
        .filter(|entry| !entry.starts_with(&reserved_prefix) && entry.as_str() != JOB_SPEC_ENV)
        .cloned()
        .collect();
    env.push(format!("{}{}", reserved_prefix, job_spec_json));
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_inputs(paths: &[&str], sharding: ShardingConfig) -> Job {
        Job {
            id: "job-1".into(),
            spec: JobSpec {
                docker: DockerSpec {
                    image: "ubuntu:22.04".into(),
                    ..Default::default()
                },
                contexts: vec![StorageSpec::local_directory("/ctx", "/context")],
                inputs: paths
                    .iter()
                    .map(|p| StorageSpec::local_directory(format!("/host{}", p), *p))
                    .collect(),
                sharding,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_shard_id_includes_job() {
        let job = job_with_inputs(&[], ShardingConfig::default());
        assert_eq!(JobShard::new(job.clone(), 3).id(), "job-1:3");
        let mut other = job;
        other.id = "job-2".into();
        assert_ne!(JobShard::new(other, 3).id(), "job-1:3");
    }

    #[test]
    fn test_unsharded_job_gets_everything_on_shard_zero() {
        let job = job_with_inputs(&["/a", "/b"], ShardingConfig::default());
        let specs = shard_storage_specs(&JobShard::new(job.clone(), 0)).unwrap();
        let paths: Vec<_> = specs.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/context", "/a", "/b"]);

        let specs = shard_storage_specs(&JobShard::new(job, 1)).unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn test_batches_with_glob() {
        let sharding = ShardingConfig {
            glob_pattern: "/data/*.csv".into(),
            batch_size: 2,
        };
        let job = job_with_inputs(
            &["/data/1.csv", "/data/skip.txt", "/data/2.csv", "/data/3.csv"],
            sharding,
        );

        let first = shard_storage_specs(&JobShard::new(job.clone(), 0)).unwrap();
        let paths: Vec<_> = first.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/context", "/data/1.csv", "/data/2.csv"]);

        let second = shard_storage_specs(&JobShard::new(job.clone(), 1)).unwrap();
        let paths: Vec<_> = second.iter().map(|s| s.path.as_str()).collect();
        assert_eq!(paths, vec!["/context", "/data/3.csv"]);

        let past_end = shard_storage_specs(&JobShard::new(job, 2)).unwrap();
        assert_eq!(past_end.len(), 1);
    }

    #[test]
    fn test_invalid_glob_is_validation_error() {
        let sharding = ShardingConfig {
            glob_pattern: "[".into(),
            batch_size: 1,
        };
        let job = job_with_inputs(&["/a"], sharding);
        assert!(matches!(
            shard_storage_specs(&JobShard::new(job, 0)),
            Err(ExecutorError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_job_id_and_image() {
        let job = job_with_inputs(&[], ShardingConfig::default());
        assert!(JobShard::new(job.clone(), 0).validate().is_ok());

        let mut bad_id = job.clone();
        bad_id.id = "job/1".into();
        assert!(JobShard::new(bad_id.clone(), 0).validate().is_err());
        assert_eq!(bad_id.id, "job/1", "ids are rejected, never rewritten");

        let mut allowed = job.clone();
        allowed.id = "a-b_c.9".into();
        assert!(JobShard::new(allowed, 0).validate().is_ok());

        let mut no_image = job;
        no_image.spec.docker.image = " ".into();
        assert!(JobShard::new(no_image, 0).validate().is_err());
    }

    #[test]
    fn test_json_with_max() {
        let spec = job_with_inputs(&["/a"], ShardingConfig::default()).spec;
        let json = json_with_max(&spec, 1 << 20).unwrap();
        let parsed: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);

        assert!(matches!(
            json_with_max(&spec, 10),
            Err(ExecutorError::JobSpec(_))
        ));
    }

    #[test]
    fn test_job_environment_overrides_reserved_key() {
        let user = vec![
            "A=1".to_string(),
            format!("{}=user-supplied", JOB_SPEC_ENV),
            "B=2".to_string(),
        ];
        let env = job_environment(&user, "{\"x\":1}");
        assert_eq!(
            env,
            vec![
                "A=1".to_string(),
                "B=2".to_string(),
                format!("{}={{\"x\":1}}", JOB_SPEC_ENV),
            ]
        );
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: JobSpec =
            serde_json::from_str(r#"{ "docker": { "image": "alpine" } }"#).unwrap();
        assert_eq!(spec.network, NetworkMode::None);
        assert!(spec.outputs.is_empty());
        assert_eq!(spec.timeout(), None);
    }
}
