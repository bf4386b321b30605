//! Run results
//!
//! Every shard that reaches the running state produces exactly one
//! [`RunResult`]. Faults met along the way are kept side by side rather than
//! collapsed into one, so callers see each independent failure.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";
pub const EXIT_CODE_FILE: &str = "exitCode";

/// Exit code reported when the container's real status is unknown
pub const UNKNOWN_EXIT_CODE: i64 = -1;

/// A failure at or after the running state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunFault {
    /// Waiting on the container failed
    Wait(String),
    /// The job's timeout expired
    TimedOut(u64),
    /// The shard was cancelled while running
    Cancelled,
    /// The runtime reported an error with the exit status
    Runtime(String),
    /// Following the container's logs failed
    Logs(String),
    /// Writing result files failed
    Persist(String),
}

impl std::fmt::Display for RunFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunFault::Wait(msg) => write!(f, "waiting for container failed: {}", msg),
            RunFault::TimedOut(secs) => write!(f, "job timed out after {}s", secs),
            RunFault::Cancelled => write!(f, "shard cancelled"),
            RunFault::Runtime(msg) => write!(f, "container error: {}", msg),
            RunFault::Logs(msg) => write!(f, "failed to follow container logs: {}", msg),
            RunFault::Persist(msg) => write!(f, "failed to write results: {}", msg),
        }
    }
}

/// Outcome of one shard run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub results_dir: PathBuf,
    /// Head of stdout, at most the configured capture size
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub exit_code: i64,
    pub errors: Vec<RunFault>,
}

impl RunResult {
    /// Every fault joined into one message, or `None` when there were none
    pub fn combined_error(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.exit_code == 0
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.results_dir.join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.results_dir.join(STDERR_FILE)
    }
}

/// Persist stdout, stderr and the exit code into `results_dir` and build the
/// shard's result. Write failures become [`RunFault::Persist`] entries.
pub async fn write_job_results(
    results_dir: &Path,
    stdout: &[u8],
    stderr: &[u8],
    exit_code: i64,
    mut errors: Vec<RunFault>,
    max_capture: usize,
) -> RunResult {
    let exit_code_text = exit_code.to_string();
    let files: [(&str, &[u8]); 3] = [
        (STDOUT_FILE, stdout),
        (STDERR_FILE, stderr),
        (EXIT_CODE_FILE, exit_code_text.as_bytes()),
    ];
    for (name, contents) in files {
        let path = results_dir.join(name);
        if let Err(e) = tokio::fs::write(&path, contents).await {
            warn!(path = %path.display(), error = %e, "Failed to write result file");
            errors.push(RunFault::Persist(format!("{}: {}", path.display(), e)));
        }
    }

    let (stdout, stdout_truncated) = capture(stdout, max_capture);
    let (stderr, stderr_truncated) = capture(stderr, max_capture);

    RunResult {
        results_dir: results_dir.to_path_buf(),
        stdout,
        stdout_truncated,
        stderr,
        stderr_truncated,
        exit_code,
        errors,
    }
}

fn capture(bytes: &[u8], max: usize) -> (String, bool) {
    if bytes.len() <= max {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }
    (String::from_utf8_lossy(&bytes[..max]).into_owned(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_job_results(dir.path(), b"hello\n", b"", 3, Vec::new(), 1024).await;

        assert_eq!(std::fs::read_to_string(dir.path().join("stdout")).unwrap(), "hello\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("stderr")).unwrap(), "");
        assert_eq!(std::fs::read_to_string(dir.path().join("exitCode")).unwrap(), "3");
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.combined_error(), None);
        assert!(!result.is_success());
        assert_eq!(result.stdout_path(), dir.path().join("stdout"));
    }

    #[tokio::test]
    async fn test_capture_truncates_but_file_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let output = vec![b'x'; 100];
        let result = write_job_results(dir.path(), &output, b"err", 0, Vec::new(), 10).await;

        assert_eq!(result.stdout.len(), 10);
        assert!(result.stdout_truncated);
        assert!(!result.stderr_truncated);
        assert_eq!(std::fs::read(dir.path().join("stdout")).unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_persist_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let result = write_job_results(
            &missing,
            b"",
            b"",
            0,
            vec![RunFault::Logs("stream reset".into())],
            10,
        )
        .await;

        assert_eq!(result.errors.len(), 4);
        assert!(matches!(result.errors[0], RunFault::Logs(_)));
        assert!(matches!(result.errors[1], RunFault::Persist(_)));
    }

    #[test]
    fn test_combined_error_keeps_every_fault() {
        let result = RunResult {
            results_dir: PathBuf::from("/r"),
            stdout: String::new(),
            stdout_truncated: false,
            stderr: String::new(),
            stderr_truncated: false,
            exit_code: UNKNOWN_EXIT_CODE,
            errors: vec![
                RunFault::Wait("connection reset".into()),
                RunFault::Logs("EOF".into()),
            ],
        };
        let combined = result.combined_error().unwrap();
        assert_eq!(
            combined,
            "waiting for container failed: connection reset; failed to follow container logs: EOF"
        );
    }
}
