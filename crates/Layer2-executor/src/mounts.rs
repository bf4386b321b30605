//! Volume mount building
//!
//! Inputs become read-only binds of their prepared host paths. Each output
//! gets a fresh directory under the shard's results directory, bound
//! read-write at the output's container path.

use crate::error::{ExecutorError, Result};
use crate::storage::{PreparedStorage, StorageSpec, StorageVolumeType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Permissions for output directories (rwxr-xr-x)
pub const OUTPUT_DIR_MODE: u32 = 0o755;

/// One bind mount handed to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Host path
    pub source: PathBuf,
    /// Container path
    pub target: String,
    pub read_only: bool,
}

/// Build the mount list: inputs first, then outputs, in declaration order.
///
/// Nothing is created on the host unless every input and output is valid.
pub fn build_mounts(
    inputs: &[PreparedStorage],
    outputs: &[StorageSpec],
    results_dir: &Path,
) -> Result<Vec<MountEntry>> {
    let mut mounts = Vec::with_capacity(inputs.len() + outputs.len());

    for input in inputs {
        match input.volume.volume_type {
            StorageVolumeType::Bind => mounts.push(MountEntry {
                source: input.volume.source.clone(),
                target: input.volume.target.clone(),
                read_only: true,
            }),
            ref other => return Err(ExecutorError::UnknownVolumeType(other.to_string())),
        }
    }

    for output in outputs {
        validate_output(output)?;
    }

    for output in outputs {
        let dir = results_dir.join(&output.name);
        create_output_dir(&dir)?;
        debug!(output = %output.name, dir = %dir.display(), "Created output directory");
        mounts.push(MountEntry {
            source: dir,
            target: output.path.clone(),
            read_only: false,
        });
    }

    Ok(mounts)
}

fn validate_output(output: &StorageSpec) -> Result<()> {
    if output.name.is_empty() {
        return Err(ExecutorError::validation(format!(
            "output volume has no name: {:?}",
            output
        )));
    }
    if output.path.is_empty() {
        return Err(ExecutorError::validation(format!(
            "output volume has no path: {:?}",
            output
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn create_output_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().mode(OUTPUT_DIR_MODE).create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_output_dir(dir: &Path) -> Result<()> {
    std::fs::DirBuilder::new().create(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageVolume;

    fn bind_input(source: &str, target: &str) -> PreparedStorage {
        PreparedStorage {
            spec: StorageSpec::local_directory(source, target),
            volume: StorageVolume::bind(source, target),
        }
    }

    #[test]
    fn test_input_and_output_mounts() {
        let results = tempfile::tempdir().unwrap();
        let mounts = build_mounts(
            &[bind_input("/host/in", "/data/in")],
            &[StorageSpec::output("out", "/data/out")],
            results.path(),
        )
        .unwrap();

        assert_eq!(
            mounts,
            vec![
                MountEntry {
                    source: PathBuf::from("/host/in"),
                    target: "/data/in".into(),
                    read_only: true,
                },
                MountEntry {
                    source: results.path().join("out"),
                    target: "/data/out".into(),
                    read_only: false,
                },
            ]
        );
        assert!(results.path().join("out").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let results = tempfile::tempdir().unwrap();
        build_mounts(&[], &[StorageSpec::output("out", "/out")], results.path()).unwrap();
        let mode = std::fs::metadata(results.path().join("out"))
            .unwrap()
            .permissions()
            .mode();
        // umask may only clear bits
        assert_eq!(mode & !OUTPUT_DIR_MODE & 0o777, 0);
        assert_eq!(mode & 0o700, 0o700);
    }

    #[test]
    fn test_empty_output_path_creates_nothing() {
        let results = tempfile::tempdir().unwrap();
        let outputs = [
            StorageSpec::output("first", "/first"),
            StorageSpec::output("broken", ""),
        ];
        let err = build_mounts(&[], &outputs, results.path()).unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));
        assert!(err.to_string().contains("no path"));
        assert_eq!(std::fs::read_dir(results.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_output_name_rejected() {
        let results = tempfile::tempdir().unwrap();
        let err = build_mounts(&[], &[StorageSpec::output("", "/out")], results.path())
            .unwrap_err();
        assert!(err.to_string().contains("no name"));
    }

    #[test]
    fn test_unknown_volume_type_aborts() {
        let results = tempfile::tempdir().unwrap();
        let mut input = bind_input("/host/in", "/in");
        input.volume.volume_type = StorageVolumeType::Tmpfs;

        let err = build_mounts(
            &[bind_input("/host/ok", "/ok"), input],
            &[StorageSpec::output("out", "/out")],
            results.path(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown storage volume type: tmpfs");
        assert!(!results.path().join("out").exists());
    }

    #[test]
    fn test_existing_output_dir_fails() {
        let results = tempfile::tempdir().unwrap();
        std::fs::create_dir(results.path().join("out")).unwrap();
        let err = build_mounts(&[], &[StorageSpec::output("out", "/out")], results.path())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Io(_)));
    }
}
