//! Shared pool registry.
//!
//! Tracks every task's lifecycle state, the process group each running
//! wrapper owns, and the termination channel of every occupied slot.
//! A slot's group is only written by the wrapper that owns it; lifecycle
//! transitions are only written by the pool driver.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use nix::sys::signal::Signal;
use swarmrun_core::{CoreError, TaskId, TaskState, WorkerOutcome};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::process::ProcessGroup;

/// Sender half of a slot's termination request.
pub(crate) type TerminationSender = watch::Sender<Option<Signal>>;

/// Receiver half handed to the wrapper owning the slot.
pub(crate) type TerminationReceiver = watch::Receiver<Option<Signal>>;

#[derive(Default)]
struct Registry {
    /// `false` once a hard stop was requested; nothing else is admitted.
    admitting: bool,
    states: BTreeMap<TaskId, TaskState>,
    terminators: HashMap<TaskId, TerminationSender>,
    groups: HashMap<TaskId, ProcessGroup>,
}

/// Process-wide registry of task states and in-flight slots.
pub struct PoolState {
    inner: Mutex<Registry>,
}

impl PoolState {
    /// Registry with every task `Pending` and admission open.
    pub fn new(task_ids: impl IntoIterator<Item = TaskId>) -> Self {
        let states = task_ids
            .into_iter()
            .map(|id| (id, TaskState::Pending))
            .collect();
        Self {
            inner: Mutex::new(Registry {
                admitting: true,
                states,
                ..Registry::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move a pending task into a slot.
    ///
    /// Returns `Ok(None)` without touching the task when admission is closed.
    pub(crate) fn admit(&self, task_id: TaskId) -> Result<Option<TerminationReceiver>, CoreError> {
        let mut registry = self.lock();
        if !registry.admitting {
            return Ok(None);
        }
        let state = registry
            .states
            .get_mut(&task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        *state = state.transition(TaskState::Running)?;

        let (tx, rx) = watch::channel(None);
        registry.terminators.insert(task_id, tx);
        debug!(task_id = %task_id, "Admitted task");
        Ok(Some(rx))
    }

    /// Record the process group a wrapper just spawned.
    pub(crate) fn attach_group(&self, task_id: TaskId, group: ProcessGroup) {
        self.lock().groups.insert(task_id, group);
    }

    /// Forget a group whose leader exited on its own and whose output was drained.
    pub(crate) fn release_group(&self, task_id: TaskId) {
        self.lock().groups.remove(&task_id);
    }

    /// Store a task's outcome and close its slot.
    pub(crate) fn record(&self, outcome: &WorkerOutcome) -> Result<(), CoreError> {
        let mut registry = self.lock();
        let state = registry
            .states
            .get_mut(&outcome.task_id)
            .ok_or_else(|| CoreError::TaskNotFound(outcome.task_id.to_string()))?;
        *state = state.transition(TaskState::Finished(outcome.status))?;
        registry.terminators.remove(&outcome.task_id);
        Ok(())
    }

    /// Stop admitting queued tasks without signalling running slots.
    ///
    /// Returns the number of tasks left pending.
    pub(crate) fn close_admission(&self) -> usize {
        let mut registry = self.lock();
        registry.admitting = false;
        registry
            .states
            .values()
            .filter(|state| **state == TaskState::Pending)
            .count()
    }

    /// Close admission and ask every occupied slot to forward `signal`.
    ///
    /// Both happen under one lock, so no task can be admitted after the
    /// request went out. Returns the number of slots signalled.
    pub(crate) fn stop(&self, signal: Signal) -> usize {
        let mut registry = self.lock();
        registry.admitting = false;

        let mut signalled = 0;
        for (task_id, terminator) in &registry.terminators {
            if terminator.send(Some(signal)).is_ok() {
                signalled += 1;
            } else {
                warn!(task_id = %task_id, "Slot dropped its termination channel");
            }
        }
        signalled
    }

    /// Returns true while new tasks may still be admitted.
    pub fn is_admitting(&self) -> bool {
        self.lock().admitting
    }

    /// Current state of one task.
    pub fn state_of(&self, task_id: TaskId) -> Option<TaskState> {
        self.lock().states.get(&task_id).copied()
    }

    /// Tasks currently holding a slot.
    pub fn running(&self) -> Vec<TaskId> {
        self.lock()
            .states
            .iter()
            .filter(|(_, state)| **state == TaskState::Running)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tasks that were never admitted.
    pub fn pending(&self) -> Vec<TaskId> {
        self.lock()
            .states
            .iter()
            .filter(|(_, state)| **state == TaskState::Pending)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Process groups that may still have live members.
    pub fn groups(&self) -> Vec<(TaskId, ProcessGroup)> {
        let mut groups: Vec<_> = self
            .lock()
            .groups
            .iter()
            .map(|(id, group)| (*id, *group))
            .collect();
        groups.sort_by_key(|(id, _)| *id);
        groups
    }
}
