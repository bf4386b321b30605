//! Shard executors
//!
//! - `Executor` - the interface a compute node drives
//! - `ContainerExecutor` - runs each shard in a labeled, resource-limited container

pub mod container;
pub mod r#trait;

pub use container::{ContainerExecutor, ExecutorSettings};
pub use r#trait::Executor;
