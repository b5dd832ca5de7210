//! Status enums for tasks and their outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Terminal classification of one task's run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    /// Exited 0 and emitted the success marker.
    Succeeded,
    /// Exited 0 without a success marker.
    CompletedNoSolution,
    /// Exited non-zero (or was killed by a signal) on its own.
    Failed,
    /// Exceeded the per-task timeout and was killed.
    TimedOut,
    /// Terminated because another task succeeded, or the run was interrupted.
    Cancelled,
    /// The agent program could not be started.
    SpawnError,
}

impl OutcomeStatus {
    /// All statuses, in display order.
    pub const ALL: [OutcomeStatus; 6] = [
        Self::Succeeded,
        Self::CompletedNoSolution,
        Self::Failed,
        Self::TimedOut,
        Self::Cancelled,
        Self::SpawnError,
    ];

    /// Returns true if the task found a solution.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the agent process exited with code 0.
    pub fn exited_cleanly(&self) -> bool {
        matches!(self, Self::Succeeded | Self::CompletedNoSolution)
    }

    /// Returns true if the outcome counts as a failed task.
    pub fn is_failure(&self) -> bool {
        !self.exited_cleanly()
    }

    /// Stable snake_case name used in logs and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::CompletedNoSolution => "completed_no_solution",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::SpawnError => "spawn_error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task inside the pool.
///
/// `Pending -> Running -> Finished(status)`. A task never leaves `Pending`
/// except through admission, and `Cancelled` is only reachable from
/// `Running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Queued, not yet admitted to a slot.
    #[default]
    Pending,
    /// Admitted; its wrapper owns a slot.
    Running,
    /// Produced its single outcome.
    Finished(OutcomeStatus),
}

impl TaskState {
    /// Check whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            // Spawn failures can be reported without ever holding a process.
            (Self::Pending, Self::Finished(OutcomeStatus::SpawnError)) => true,
            (Self::Running, Self::Finished(_)) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(self, next: TaskState) -> Result<TaskState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Finished(status) => write!(f, "finished({})", status),
        }
    }
}
