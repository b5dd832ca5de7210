//! The single result each task produces.

use serde::Serialize;
use std::time::Duration;

use crate::{OutcomeStatus, TaskId};

/// Outcome of one task, produced exactly once by its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerOutcome {
    /// Task this outcome belongs to.
    pub task_id: TaskId,

    /// Terminal classification.
    pub status: OutcomeStatus,

    /// Agent exit code, when the process exited on its own.
    pub exit_code: Option<i32>,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error, or a description of what went wrong.
    pub stderr: String,

    /// Wall-clock time the worker spent on the task.
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl WorkerOutcome {
    /// Create an outcome with empty output.
    pub fn new(task_id: TaskId, status: OutcomeStatus) -> Self {
        Self {
            task_id,
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Outcome for an agent that could not be started.
    pub fn spawn_error(task_id: TaskId, message: impl Into<String>) -> Self {
        Self::new(task_id, OutcomeStatus::SpawnError).with_output(String::new(), message.into())
    }

    /// Builder method to attach captured output.
    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Builder method to attach the exit code.
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Builder method to attach the elapsed time.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
