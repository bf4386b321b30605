//! Container runtime control interface
//!
//! The executor drives an existing runtime daemon through [`ContainerRuntime`].
//! [`DockerRuntime`] talks to Docker; tests substitute an in-memory fake.

mod docker;

pub use docker::{split_image_reference, DockerRuntime};

use crate::mounts::MountEntry;
use crate::resources::RuntimeLimits;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Everything the runtime needs to create the shard's container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub entrypoint: Vec<String>,
    /// `KEY=value` entries
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountEntry>,
    pub limits: RuntimeLimits,
    pub network_mode: String,
}

/// How a container stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i64,
    /// Error the runtime reported alongside the exit, if any
    pub error: Option<String>,
}

impl ExitStatus {
    pub fn code(code: i64) -> Self {
        Self { code, error: None }
    }
}

/// A piece of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Container,
    Network,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Container => write!(f, "container"),
            ObjectKind::Network => write!(f, "network"),
        }
    }
}

/// A labeled object found on the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeObject {
    pub kind: ObjectKind,
    pub id: String,
    pub labels: HashMap<String, String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name for logs
    fn name(&self) -> &'static str;

    /// Check the daemon is reachable
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container, returning its ID
    async fn create_container(&self, name: &str, spec: &ContainerSpec)
        -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Follow stdout and stderr until the container stops
    fn follow_logs(&self, id: &str) -> BoxStream<'static, Result<LogChunk, RuntimeError>>;

    /// Wait for the container to leave the running state
    async fn wait_container(&self, id: &str) -> Result<ExitStatus, RuntimeError>;

    /// Every container and network carrying `key=value`
    async fn list_objects(&self, key: &str, value: &str)
        -> Result<Vec<RuntimeObject>, RuntimeError>;

    /// Force-remove one object
    async fn remove_object(&self, kind: ObjectKind, id: &str) -> Result<(), RuntimeError>;

    /// Remove every object carrying `key=value`.
    ///
    /// Objects that disappear in the meantime are not errors. Other failures
    /// do not stop the sweep; they are reported together at the end.
    async fn remove_by_label(&self, key: &str, value: &str) -> Result<usize, RuntimeError> {
        let objects = self.list_objects(key, value).await?;
        let mut removed = 0;
        let mut failures = Vec::new();

        for object in objects {
            match self.remove_object(object.kind, &object.id).await {
                Ok(()) => {
                    debug!(kind = %object.kind, id = %object.id, "Removed object");
                    removed += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(kind = %object.kind, id = %object.id, error = %e, "Failed to remove object");
                    failures.push(format!("{} {}: {}", object.kind, object.id, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(RuntimeError::Api(failures.join("; ")))
        }
    }
}
