//! # shard-foundation
//!
//! Foundation layer for ShardNode:
//! - Error: shared error type and `Result` alias
//! - Storage: JsonStore (global / project settings files)
//! - Config: NodeConfig (executor identity, results root, pull/keep toggles)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    validate_executor_id, NodeConfig, ENV_DOCKER_HOST, ENV_EXECUTOR_ID, ENV_KEEP_STACK,
    ENV_RESULTS_ROOT, ENV_SKIP_IMAGE_PULL, NODE_CONFIG_FILE,
};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{JsonStore, STORE_DIR_NAME};
