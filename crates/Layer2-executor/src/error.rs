//! Executor error types
//!
//! Every failure before a container reaches the running state is returned as
//! an `ExecutorError`. Failures after that point are carried inside the
//! `RunResult` instead.

use crate::runtime::RuntimeError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Error, Debug)]
pub enum ExecutorError {
    // ========================================================================
    // Validation
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("unknown storage volume type: {0}")]
    UnknownVolumeType(String),

    // ========================================================================
    // Preparation
    // ========================================================================
    #[error(transparent)]
    Storage(#[from] shard_foundation::Error),

    #[error(
        "Could not pull image {image:?} - could be due to repo/image not existing, \
         or registry needing authorization: {source}"
    )]
    ImagePull {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Job spec error: {0}")]
    JobSpec(String),

    // ========================================================================
    // Container lifecycle
    // ========================================================================
    #[error("failed to create container: {0}")]
    CreateContainer(#[source] RuntimeError),

    #[error("Executable file not found: {0}")]
    ExecutableNotFound(#[source] RuntimeError),

    #[error("failed to start container: {0}")]
    StartContainer(#[source] RuntimeError),

    #[error("Cancelled before the container started")]
    Cancelled,

    // ========================================================================
    // Conversions from external errors
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Errors the job submitter can fix (bad spec, bad image, bad entrypoint),
    /// as opposed to node infrastructure failures.
    pub fn is_user_facing(&self) -> bool {
        match self {
            ExecutorError::Validation(_)
            | ExecutorError::UnknownVolumeType(_)
            | ExecutorError::ImagePull { .. }
            | ExecutorError::JobSpec(_)
            | ExecutorError::ExecutableNotFound(_) => true,
            ExecutorError::Storage(e) => e.is_user_facing(),
            _ => false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ExecutorError::Validation(message.into())
    }
}
