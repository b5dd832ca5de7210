//! Task descriptors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::TaskId;

/// Immutable description of one agent invocation.
///
/// Created once when the run starts and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Task identifier (submission index).
    pub id: TaskId,

    /// Problem input forwarded untouched to the agent.
    pub input_path: PathBuf,

    /// Per-task wall-clock budget. `None` means unlimited.
    pub timeout: Option<Duration>,

    /// Agent program to launch.
    pub agent_program: PathBuf,

    /// Auxiliary prompts passed to the agent as one comma-joined argument.
    pub prompts: Vec<String>,
}

impl TaskSpec {
    /// Create a new TaskSpec with no timeout and no prompts.
    pub fn new(
        id: TaskId,
        input_path: impl Into<PathBuf>,
        agent_program: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            input_path: input_path.into(),
            timeout: None,
            agent_program: agent_program.into(),
            prompts: Vec::new(),
        }
    }

    /// Builder method to set the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to set the auxiliary prompts.
    pub fn with_prompts(mut self, prompts: Vec<String>) -> Self {
        self.prompts = prompts;
        self
    }

    /// The prompt list as passed on the agent command line.
    pub fn joined_prompts(&self) -> String {
        self.prompts.join(",")
    }

    /// Build `count` identical tasks numbered `0..count`.
    pub fn batch(
        count: usize,
        input_path: &Path,
        agent_program: &Path,
        timeout: Option<Duration>,
        prompts: &[String],
    ) -> Vec<TaskSpec> {
        (0..count)
            .map(|index| {
                TaskSpec::new(TaskId::new(index), input_path, agent_program)
                    .with_timeout(timeout)
                    .with_prompts(prompts.to_vec())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_numbers_tasks_in_order() {
        let prompts = vec!["hint".to_string(), "verify".to_string()];
        let tasks = TaskSpec::batch(
            3,
            Path::new("problem.txt"),
            Path::new("agent.py"),
            Some(Duration::from_secs(60)),
            &prompts,
        );

        assert_eq!(tasks.len(), 3);
        for (index, task) in tasks.iter().enumerate() {
            assert_eq!(task.id, TaskId::new(index));
            assert_eq!(task.timeout, Some(Duration::from_secs(60)));
            assert_eq!(task.joined_prompts(), "hint,verify");
        }
    }

    #[test]
    fn test_joined_prompts_empty() {
        let task = TaskSpec::new(TaskId::new(0), "p", "a");
        assert_eq!(task.joined_prompts(), "");
        assert!(task.timeout.is_none());
    }
}
