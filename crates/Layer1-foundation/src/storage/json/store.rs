//! JSON file store
//!
//! Node settings live as small JSON documents in a directory. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-save
//! never leaves a half-written config behind.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory name used for both global and project-level state
pub const STORE_DIR_NAME: &str = "shardnode";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<config dir>/shardnode/`
    pub fn global() -> Result<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join(STORE_DIR_NAME)))
            .ok_or_else(|| Error::Config("no user config directory on this host".to_string()))
    }

    /// `<root>/.shardnode/`
    pub fn project(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(format!(".{}", STORE_DIR_NAME)))
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("working directory unavailable: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        self.load_optional(filename)?.ok_or_else(|| {
            Error::NotFound(format!("{} does not exist", self.file_path(filename).display()))
        })
    }

    /// `None` when the file is absent; unreadable or malformed files are errors
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        let path = self.file_path(filename);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(format!("read {}: {}", path.display(), e))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Config(format!("{} is not valid: {}", path.display(), e)))
    }

    /// Pretty-printed, replaced atomically
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| Error::storage(format!("create {}: {}", self.root.display(), e)))?;

        let path = self.file_path(filename);
        let staging = self.file_path(&format!(".{}.tmp", filename));
        let mut content = serde_json::to_vec_pretty(data)?;
        content.push(b'\n');

        std::fs::write(&staging, content)
            .and_then(|()| std::fs::rename(&staging, &path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&staging);
                Error::storage(format!("write {}: {}", path.display(), e))
            })
    }

    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).is_file()
    }
}
