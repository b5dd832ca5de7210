//! Bounded process pool.
//!
//! Runs at most `width` wrappers at once, admitting queued tasks in FIFO
//! order as slots free up, and yields outcomes in the order tasks finish.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use nix::sys::signal::Signal;
use swarmrun_core::{CoreError, OutcomeStatus, TaskId, TaskSpec, WorkerOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::artifact::ensure_log_dir;
use crate::error::WorkerError;
use crate::propagator::ExitPolicy;
use crate::state::PoolState;
use crate::wrapper::{WorkerWrapper, WrapperConfig};

/// A pool of worker slots for one run.
pub struct ProcessPool {
    width: usize,
    tasks: Vec<TaskSpec>,
    config: Arc<WrapperConfig>,
    state: Arc<PoolState>,
    policy: ExitPolicy,
}

impl ProcessPool {
    /// Create a pool running `tasks` with at most `width` at a time.
    ///
    /// Fails if `width` is outside `1..=tasks.len()`, task ids repeat, or
    /// the log directory cannot be created.
    pub fn new(
        width: usize,
        tasks: Vec<TaskSpec>,
        config: WrapperConfig,
    ) -> Result<Self, WorkerError> {
        if tasks.is_empty() {
            return Err(CoreError::InvalidInput("at least one task is required".into()).into());
        }
        if width == 0 || width > tasks.len() {
            return Err(CoreError::InvalidInput(format!(
                "pool width must be between 1 and {}, got {}",
                tasks.len(),
                width
            ))
            .into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = tasks.iter().find(|t| !seen.insert(t.id)) {
            return Err(CoreError::InvalidInput(format!("duplicate task id {}", dup.id)).into());
        }

        ensure_log_dir(&config.log_dir)?;

        let state = Arc::new(PoolState::new(tasks.iter().map(|t| t.id)));
        Ok(Self {
            width,
            tasks,
            config: Arc::new(config),
            state,
            policy: ExitPolicy::default(),
        })
    }

    /// Set what happens to queued tasks once one succeeds.
    ///
    /// Under [`ExitPolicy::ExitImmediately`] the first `Succeeded` outcome
    /// closes admission before its slot is refilled.
    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shared registry of this pool.
    pub fn state(&self) -> Arc<PoolState> {
        self.state.clone()
    }

    /// Handle that can hard-stop the pool from elsewhere.
    pub fn stop_handle(&self) -> PoolStopHandle {
        PoolStopHandle {
            state: self.state.clone(),
        }
    }

    /// Start admitting tasks. Must be called inside a tokio runtime.
    pub fn start(self) -> OutcomeStream {
        let total = self.tasks.len();
        info!(tasks = total, width = self.width, policy = ?self.policy, "Starting worker pool");

        let (tx, rx) = mpsc::channel(total);
        tokio::spawn(drive(
            self.tasks.into(),
            self.width,
            self.config,
            self.state,
            self.policy,
            tx,
        ));
        OutcomeStream { rx }
    }
}

/// Completion-ordered stream of outcomes.
pub struct OutcomeStream {
    rx: mpsc::Receiver<WorkerOutcome>,
}

impl OutcomeStream {
    /// Wait for the next task to finish.
    ///
    /// Returns `None` once every admitted task has reported.
    pub async fn next(&mut self) -> Option<WorkerOutcome> {
        self.rx.recv().await
    }
}

/// Clonable handle for stopping a running pool.
#[derive(Clone)]
pub struct PoolStopHandle {
    state: Arc<PoolState>,
}

impl PoolStopHandle {
    /// Stop admitting queued tasks and forward `signal` to every active slot.
    ///
    /// Returns the number of slots that were asked to terminate.
    pub fn hard_stop(&self, signal: Signal) -> usize {
        let signalled = self.state.stop(signal);
        info!(signal = ?signal, slots = signalled, "Pool hard stop");
        signalled
    }

    /// Returns true once a hard stop was issued.
    pub fn is_stopped(&self) -> bool {
        !self.state.is_admitting()
    }

    /// Registry of the pool this handle stops.
    pub fn state(&self) -> &Arc<PoolState> {
        &self.state
    }
}

async fn drive(
    mut queue: VecDeque<TaskSpec>,
    width: usize,
    config: Arc<WrapperConfig>,
    state: Arc<PoolState>,
    policy: ExitPolicy,
    tx: mpsc::Sender<WorkerOutcome>,
) {
    let mut active: JoinSet<WorkerOutcome> = JoinSet::new();
    let mut slots: HashMap<tokio::task::Id, TaskId> = HashMap::new();

    loop {
        while active.len() < width {
            let Some(task) = queue.pop_front() else {
                break;
            };
            let task_id = task.id;
            match state.admit(task_id) {
                Ok(Some(termination)) => {
                    let wrapper = WorkerWrapper::new(task, config.clone());
                    let handle = active.spawn(wrapper.run(termination, state.clone()));
                    slots.insert(handle.id(), task_id);
                }
                Ok(None) => {
                    debug!(queued = queue.len() + 1, "Admission closed, queued tasks stay pending");
                    queue.clear();
                    break;
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Cannot admit task");
                }
            }
        }

        let Some(joined) = active.join_next_with_id().await else {
            break;
        };

        let outcome = match joined {
            Ok((id, outcome)) => {
                slots.remove(&id);
                outcome
            }
            Err(e) => {
                let Some(task_id) = slots.remove(&e.id()) else {
                    error!(error = %e, "Worker slot failed for an unknown task");
                    continue;
                };
                error!(task_id = %task_id, error = %e, "Worker slot panicked");
                WorkerOutcome::new(task_id, OutcomeStatus::Failed)
                    .with_output(String::new(), format!("worker panicked: {e}"))
            }
        };

        if let Err(e) = state.record(&outcome) {
            warn!(task_id = %outcome.task_id, error = %e, "Failed to record outcome");
        }
        // The freed slot must not pick up queued work once a solution exists.
        if policy == ExitPolicy::ExitImmediately && outcome.status.is_success() {
            let left = state.close_admission();
            info!(task_id = %outcome.task_id, pending = left, "Solution found, admission closed");
        }
        if tx.send(outcome).await.is_err() {
            debug!("Outcome stream dropped; continuing to reap workers");
        }
    }

    info!("Worker pool drained");
}
