//! Config - node settings
//!
//! - `node.rs` - NodeConfig (results root, image pull, keep-stack, limits)

mod node;

pub use node::{
    validate_executor_id, NodeConfig, ENV_DOCKER_HOST, ENV_EXECUTOR_ID, ENV_KEEP_STACK,
    ENV_RESULTS_ROOT, ENV_SKIP_IMAGE_PULL, NODE_CONFIG_FILE,
};
