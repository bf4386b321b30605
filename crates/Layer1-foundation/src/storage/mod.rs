//! Storage module for ShardNode
//!
//! - `json`: JSON - general purpose file save/load

mod json;

pub use json::{JsonStore, STORE_DIR_NAME};
