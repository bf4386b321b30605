//! Storage specs and the storage preparation interface
//!
//! The executor never resolves data itself. A [`StorageProvider`] hands out a
//! [`Storage`] per source type, and each storage turns a [`StorageSpec`] into a
//! host-local [`StorageVolume`] the container can bind.

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use shard_foundation::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// Specs and volumes
// ============================================================================

/// Where a piece of data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageSourceType {
    Ipfs,
    UrlDownload,
    LocalDirectory,
    Inline,
}

impl std::fmt::Display for StorageSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageSourceType::Ipfs => "ipfs",
            StorageSourceType::UrlDownload => "urlDownload",
            StorageSourceType::LocalDirectory => "localDirectory",
            StorageSourceType::Inline => "inline",
        };
        write!(f, "{}", name)
    }
}

/// Abstract description of a data source or sink.
///
/// For inputs `path` is where the data appears inside the container; for
/// outputs `name` names the results subdirectory and `path` is the
/// in-container directory the workload writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub storage_source: StorageSourceType,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    pub path: String,
}

impl StorageSpec {
    /// Host directory bound into the container at `path`
    pub fn local_directory(source: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self {
            storage_source: StorageSourceType::LocalDirectory,
            name: String::new(),
            cid: None,
            url: None,
            source_path: Some(source.into()),
            path: path.into(),
        }
    }

    /// Declared output: `name` under the results dir, `path` inside the container
    pub fn output(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            storage_source: StorageSourceType::Ipfs,
            name: name.into(),
            cid: None,
            url: None,
            source_path: None,
            path: path.into(),
        }
    }
}

/// How a prepared volume is attached to the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageVolumeType {
    Bind,
    Volume,
    Tmpfs,
}

impl std::fmt::Display for StorageVolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageVolumeType::Bind => write!(f, "bind"),
            StorageVolumeType::Volume => write!(f, "volume"),
            StorageVolumeType::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A spec resolved to something on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    pub volume_type: StorageVolumeType,
    /// Host path
    pub source: PathBuf,
    /// Container path
    pub target: String,
}

impl StorageVolume {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            volume_type: StorageVolumeType::Bind,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A spec together with the volume it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStorage {
    pub spec: StorageSpec,
    pub volume: StorageVolume,
}

// ============================================================================
// Traits
// ============================================================================

/// Storage for one source type
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether the backing software is available on this host
    async fn is_installed(&self) -> Result<bool>;

    /// Whether the data is already present locally
    async fn has_storage_locally(&self, spec: &StorageSpec) -> Result<bool>;

    /// Size of the data in bytes
    async fn get_volume_size(&self, spec: &StorageSpec) -> Result<u64>;

    /// Make the data available on this host
    async fn prepare_storage(&self, spec: &StorageSpec) -> Result<StorageVolume>;
}

/// Looks up the storage implementation for a source type
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn get_storage(&self, source: StorageSourceType) -> Result<Arc<dyn Storage>>;
}

/// Resolve every spec with at most `max_parallel` preparations in flight.
///
/// Results keep the order of `specs`. The first failure aborts the batch.
pub async fn parallel_prepare_storage(
    provider: &dyn StorageProvider,
    specs: Vec<StorageSpec>,
    max_parallel: usize,
) -> Result<Vec<PreparedStorage>> {
    debug!(count = specs.len(), max_parallel, "Preparing storage");
    stream::iter(specs)
        .map(|spec| async move {
            let storage = provider.get_storage(spec.storage_source).await?;
            let volume = storage.prepare_storage(&spec).await?;
            trace!(?spec, ?volume, "Prepared storage");
            Ok::<_, Error>(PreparedStorage { spec, volume })
        })
        .buffered(max_parallel.max(1))
        .try_collect()
        .await
}

// ============================================================================
// Mapped provider
// ============================================================================

/// Provider backed by a fixed map of source type to storage
#[derive(Default, Clone)]
pub struct MappedStorageProvider {
    storages: HashMap<StorageSourceType, Arc<dyn Storage>>,
}

impl MappedStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, source: StorageSourceType, storage: Arc<dyn Storage>) -> Self {
        self.storages.insert(source, storage);
        self
    }
}

#[async_trait]
impl StorageProvider for MappedStorageProvider {
    async fn get_storage(&self, source: StorageSourceType) -> Result<Arc<dyn Storage>> {
        self.storages
            .get(&source)
            .cloned()
            .ok_or_else(|| Error::UnsupportedStorage(source.to_string()))
    }
}

// ============================================================================
// Local directory storage
// ============================================================================

/// Binds an existing host directory into the container
#[derive(Debug, Default, Clone)]
pub struct LocalDirectoryStorage;

impl LocalDirectoryStorage {
    pub fn new() -> Self {
        Self
    }

    fn source_of(spec: &StorageSpec) -> Result<&Path> {
        spec.source_path
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("local directory input {:?} has no source path", spec.path)))
    }
}

#[async_trait]
impl Storage for LocalDirectoryStorage {
    async fn is_installed(&self) -> Result<bool> {
        Ok(true)
    }

    async fn has_storage_locally(&self, spec: &StorageSpec) -> Result<bool> {
        Ok(Self::source_of(spec)?.is_dir())
    }

    async fn get_volume_size(&self, spec: &StorageSpec) -> Result<u64> {
        let source = Self::source_of(spec)?.to_path_buf();
        tokio::task::spawn_blocking(move || dir_size(&source))
            .await
            .map_err(|e| Error::Internal(format!("volume size task failed: {}", e)))?
    }

    async fn prepare_storage(&self, spec: &StorageSpec) -> Result<StorageVolume> {
        let source = Self::source_of(spec)?;
        if !source.is_dir() {
            return Err(Error::NotFound(format!(
                "local directory {} does not exist",
                source.display()
            )));
        }
        if spec.path.is_empty() {
            return Err(Error::Validation(format!(
                "local directory input {} has no target path",
                source.display()
            )));
        }
        Ok(StorageVolume::bind(source, spec.path.clone()))
    }
}

fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
