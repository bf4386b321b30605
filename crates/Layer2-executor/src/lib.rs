//! # shard-executor
//!
//! Containerized shard execution for ShardNode.
//! Takes a job shard and its resolved inputs and runs the workload in a
//! labeled, resource-limited container, then reclaims everything it created.
//!
//! ## Features
//!
//! - Resource translation (CPU / memory / GPU into runtime limits)
//! - Bind mount building for inputs and per-output result directories
//! - Deterministic object names and ownership labels
//! - Create / start / stream / wait lifecycle with distinguished failures
//! - Label-based cleanup per shard, per executor, and for orphans

pub mod cleanup;
pub mod error;
pub mod executor;
pub mod job;
pub mod labels;
pub mod mounts;
pub mod resources;
pub mod result;
pub mod runtime;
pub mod state;
pub mod storage;

// Errors
pub use error::{ExecutorError, Result};

// Executor
pub use executor::{ContainerExecutor, Executor, ExecutorSettings};
pub use state::{ShardState, ShardStates, FINISHED_STATES_RETAINED};

// Jobs
pub use job::{
    job_environment, json_with_max, shard_storage_specs, DockerSpec, Job, JobShard, JobSpec,
    NetworkMode, ShardingConfig, JOB_SPEC_ENV,
};

// Building blocks
pub use cleanup::{CleanupController, CleanupOutcome, ObjectIndex};
pub use labels::{ObjectNaming, LABEL_EXECUTOR, LABEL_JOB, NAME_PREFIX};
pub use mounts::{build_mounts, MountEntry, OUTPUT_DIR_MODE};
pub use resources::{
    translate, DeviceRequest, ResourceRequirements, ResourceUsageConfig, RuntimeLimits,
};
pub use result::{write_job_results, RunFault, RunResult, UNKNOWN_EXIT_CODE};

// Runtime
pub use runtime::{
    ContainerRuntime, ContainerSpec, DockerRuntime, ExitStatus, LogChunk, ObjectKind,
    RuntimeError, RuntimeObject,
};

// Storage
pub use storage::{
    parallel_prepare_storage, LocalDirectoryStorage, MappedStorageProvider, PreparedStorage,
    Storage, StorageProvider, StorageSourceType, StorageSpec, StorageVolume, StorageVolumeType,
};
