//! Per-task log artifacts.
//!
//! Each task owns exactly one file, `agent_NN.log`, inside the shared log
//! directory. The agent writes its own log there; once the process ends the
//! wrapper appends the captured streams under `>>>>>>>` section headers.

use std::io;
use std::path::{Path, PathBuf};

use swarmrun_core::{TaskId, SECTION_DELIMITER};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::WorkerError;

/// Handle to one task's log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogArtifact {
    task_id: TaskId,
    path: PathBuf,
}

impl LogArtifact {
    /// Artifact for `task_id` inside `log_dir`.
    pub fn for_task(log_dir: &Path, task_id: TaskId) -> Self {
        Self {
            task_id,
            path: log_dir.join(Self::file_name(task_id)),
        }
    }

    /// Deterministic file name for a task.
    pub fn file_name(task_id: TaskId) -> String {
        format!("agent_{}.log", task_id.padded())
    }

    /// Location of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate (or create) the file so a re-run never appends to stale output.
    pub async fn reset(&self) -> io::Result<()> {
        tokio::fs::File::create(&self.path).await?;
        debug!(task_id = %self.task_id, path = %self.path.display(), "Reset log artifact");
        Ok(())
    }

    /// Append the captured streams as delimited sections.
    pub async fn append_streams(&self, stdout: &str, stderr: &str) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let body = format!(
            "\n{SECTION_DELIMITER} STDOUT\n{}\n\n{SECTION_DELIMITER} STDERR\n{}\n",
            stdout.trim_end(),
            stderr.trim_end()
        );
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read the whole artifact, replacing invalid UTF-8.
    pub async fn read(&self) -> io::Result<String> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Create the log directory (and parents) if needed.
pub fn ensure_log_dir(dir: &Path) -> Result<(), WorkerError> {
    std::fs::create_dir_all(dir).map_err(|source| WorkerError::LogDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// List `*.log` files in `dir` with their sizes, sorted by name.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<(String, u64)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".log") {
            continue;
        }
        let size = entry.metadata()?.len();
        files.push((name, size));
    }
    files.sort();
    Ok(files)
}
