//! Node Config - execution node settings
//!
//! Loaded from the global store, then the project store (project wins),
//! then environment overrides.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Config file name
pub const NODE_CONFIG_FILE: &str = "config.json";

/// Skip pulling job images before creating containers
pub const ENV_SKIP_IMAGE_PULL: &str = "SHARDNODE_SKIP_IMAGE_PULL";
/// Keep containers and mounts after a shard finishes
pub const ENV_KEEP_STACK: &str = "SHARDNODE_KEEP_STACK";
/// Executor instance identity used for labeling
pub const ENV_EXECUTOR_ID: &str = "SHARDNODE_EXECUTOR_ID";
/// Root directory for per-shard results
pub const ENV_RESULTS_ROOT: &str = "SHARDNODE_RESULTS_ROOT";
/// Docker daemon address
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Identity of this executor instance. Scopes every label the node writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<String>,

    /// Directory under which each shard gets its results directory
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,

    /// Do not pull images (air-gapped or test runs)
    #[serde(default)]
    pub skip_image_pull: bool,

    /// Preserve containers after completion for post-mortem debugging
    #[serde(default)]
    pub keep_stack: bool,

    /// Deadline for each cleanup pass
    #[serde(default = "default_cleanup_timeout_secs")]
    pub cleanup_timeout_secs: u64,

    /// Concurrent storage preparations per shard
    #[serde(default = "default_max_parallel_prepare")]
    pub max_parallel_prepare: usize,

    /// Upper bound on the serialized job spec injected into the container
    #[serde(default = "default_max_job_spec_bytes")]
    pub max_job_spec_bytes: usize,

    /// stdout/stderr bytes kept in memory on the run result
    #[serde(default = "default_max_output_capture_bytes")]
    pub max_output_capture_bytes: usize,

    /// Docker daemon address (local defaults when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,
}

fn default_results_root() -> PathBuf {
    std::env::temp_dir().join("shardnode-results")
}

fn default_cleanup_timeout_secs() -> u64 {
    60
}

fn default_max_parallel_prepare() -> usize {
    4
}

fn default_max_job_spec_bytes() -> usize {
    64 * 1024
}

fn default_max_output_capture_bytes() -> usize {
    2048
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            executor_id: None,
            results_root: default_results_root(),
            skip_image_pull: false,
            keep_stack: false,
            cleanup_timeout_secs: default_cleanup_timeout_secs(),
            max_parallel_prepare: default_max_parallel_prepare(),
            max_job_spec_bytes: default_max_job_spec_bytes(),
            max_output_capture_bytes: default_max_output_capture_bytes(),
            docker_host: None,
        }
    }
}

/// Partial config as stored on disk, merged field by field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfigFile {
    executor_id: Option<String>,
    results_root: Option<PathBuf>,
    skip_image_pull: Option<bool>,
    keep_stack: Option<bool>,
    cleanup_timeout_secs: Option<u64>,
    max_parallel_prepare: Option<usize>,
    max_job_spec_bytes: Option<usize>,
    max_output_capture_bytes: Option<usize>,
    docker_host: Option<String>,
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + project merged load, then environment overrides.
    ///
    /// A missing executor ID is generated and written back to the global
    /// store so a restarted node keeps labeling objects the same way.
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(file) = global.load_optional::<NodeConfigFile>(NODE_CONFIG_FILE)? {
                config.merge(file);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(file) = project.load_optional::<NodeConfigFile>(NODE_CONFIG_FILE)? {
                config.merge(file);
            }
        }

        config.apply_env(|key| std::env::var(key).ok());

        if config.executor_id.is_none() {
            let id = uuid::Uuid::new_v4().to_string();
            debug!(executor = %id, "Generated executor id");
            config.executor_id = Some(id);
            if let Err(e) = config.persist_executor_id() {
                warn!("Failed to persist executor id: {}", e);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a single store without environment overrides
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        let mut config = Self::new();
        if let Some(file) = store.load_optional::<NodeConfigFile>(NODE_CONFIG_FILE)? {
            config.merge(file);
        }
        Ok(config)
    }

    /// Save to a store
    pub fn save_to(&self, store: &JsonStore) -> Result<()> {
        store.save(NODE_CONFIG_FILE, self)
    }

    fn persist_executor_id(&self) -> Result<()> {
        let store = JsonStore::global()?;
        let mut file = store
            .load_optional::<NodeConfigFile>(NODE_CONFIG_FILE)?
            .unwrap_or_default();
        file.executor_id = self.executor_id.clone();
        store.save(NODE_CONFIG_FILE, &file)
    }

    fn merge(&mut self, file: NodeConfigFile) {
        if file.executor_id.is_some() {
            self.executor_id = file.executor_id;
        }
        if let Some(v) = file.results_root {
            self.results_root = v;
        }
        if let Some(v) = file.skip_image_pull {
            self.skip_image_pull = v;
        }
        if let Some(v) = file.keep_stack {
            self.keep_stack = v;
        }
        if let Some(v) = file.cleanup_timeout_secs {
            self.cleanup_timeout_secs = v;
        }
        if let Some(v) = file.max_parallel_prepare {
            self.max_parallel_prepare = v;
        }
        if let Some(v) = file.max_job_spec_bytes {
            self.max_job_spec_bytes = v;
        }
        if let Some(v) = file.max_output_capture_bytes {
            self.max_output_capture_bytes = v;
        }
        if file.docker_host.is_some() {
            self.docker_host = file.docker_host;
        }
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SKIP_IMAGE_PULL) {
            self.skip_image_pull = env_flag(&v);
        }
        if let Some(v) = lookup(ENV_KEEP_STACK) {
            self.keep_stack = env_flag(&v);
        }
        if let Some(v) = lookup(ENV_EXECUTOR_ID).filter(|v| !v.is_empty()) {
            self.executor_id = Some(v);
        }
        if let Some(v) = lookup(ENV_RESULTS_ROOT).filter(|v| !v.is_empty()) {
            self.results_root = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DOCKER_HOST).filter(|v| !v.is_empty()) {
            self.docker_host = Some(v);
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.executor_id {
            validate_executor_id(id)?;
        }
        if self.cleanup_timeout_secs == 0 {
            return Err(Error::Validation(
                "cleanupTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel_prepare == 0 {
            return Err(Error::Validation(
                "maxParallelPrepare must be greater than zero".to_string(),
            ));
        }
        if self.max_job_spec_bytes == 0 {
            return Err(Error::Validation(
                "maxJobSpecBytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

/// Executor IDs end up in object names and label prefixes, so they are
/// restricted to `[A-Za-z0-9.-]`.
pub fn validate_executor_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Validation("executor id must not be empty".to_string()));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
    {
        return Err(Error::Validation(format!(
            "executor id {:?} contains invalid character {:?}",
            id, c
        )));
    }
    Ok(())
}

fn env_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert!(!config.skip_image_pull);
        assert!(!config.keep_stack);
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_parallel_prepare, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(NODE_CONFIG_FILE),
            r#"{ "executorId": "node-1", "keepStack": true }"#,
        )
        .unwrap();

        let config = NodeConfig::load_from(&JsonStore::new(dir.path())).unwrap();
        assert_eq!(config.executor_id.as_deref(), Some("node-1"));
        assert!(config.keep_stack);
        assert_eq!(config.max_job_spec_bytes, 64 * 1024);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let mut config = NodeConfig::default();
        config.executor_id = Some("abc".into());
        config.max_parallel_prepare = 8;
        config.save_to(&store).unwrap();

        let loaded = NodeConfig::load_from(&store).unwrap();
        assert_eq!(loaded.executor_id.as_deref(), Some("abc"));
        assert_eq!(loaded.max_parallel_prepare, 8);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SKIP_IMAGE_PULL, "1"),
            (ENV_KEEP_STACK, "false"),
            (ENV_EXECUTOR_ID, "from-env"),
            (ENV_RESULTS_ROOT, "/var/results"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.keep_stack = true;
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert!(config.skip_image_pull);
        assert!(!config.keep_stack);
        assert_eq!(config.executor_id.as_deref(), Some("from-env"));
        assert_eq!(config.results_root, PathBuf::from("/var/results"));
        assert!(config.docker_host.is_none());
    }

    #[test]
    fn test_executor_id_validation() {
        assert!(validate_executor_id("node-1.eu").is_ok());
        assert!(validate_executor_id("").is_err());
        assert!(validate_executor_id("a_b").is_err());
        assert!(validate_executor_id("a/b").is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = NodeConfig::default();
        config.max_parallel_prepare = 0;
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }
}
