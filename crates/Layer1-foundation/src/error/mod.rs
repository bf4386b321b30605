//! Node-wide error type
//!
//! Executor-specific failures wrap this in `ExecutorError`; everything that
//! config loading and storage providers can report is here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad or unreadable node configuration
    #[error("config: {0}")]
    Config(String),

    /// A value that failed a format or range check
    #[error("validation: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("no storage provider for source {0:?}")]
    UnsupportedStorage(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Joins, panics and other failures that say nothing about the input
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// True when changing the job or the config would fix it
    pub fn is_user_facing(&self) -> bool {
        match self {
            Error::Config(_) | Error::Validation(_) | Error::UnsupportedStorage(_) => true,
            Error::NotFound(_) => true,
            Error::Storage(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => false,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(Error::Validation("x".into()).is_user_facing());
        assert!(Error::UnsupportedStorage("ipfs".into()).is_user_facing());
        assert!(Error::NotFound("/data".into()).is_user_facing());
        assert!(!Error::storage("disk full").is_user_facing());
        assert!(!Error::Internal("boom".into()).is_user_facing());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::UnsupportedStorage("ipfs".into()).to_string(),
            "no storage provider for source \"ipfs\""
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(Error::from(io).to_string(), "denied");
    }
}
