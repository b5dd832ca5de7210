//! Cancellation propagation under the immediate-exit policy.
//!
//! On the first `Succeeded` outcome the propagator closes admission, asks
//! every running slot to forward SIGTERM to its process group, waits a
//! bounded grace period, SIGKILLs whatever is still alive, and hands back a
//! [`HardStop`]. Executing the hard stop ends the process right away and
//! skips ordinary pool teardown, which would otherwise wait on the very
//! processes being cancelled.

use std::io::Write;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use swarmrun_core::{TaskId, WorkerOutcome};
use tracing::{info, warn};

use crate::pool::PoolStopHandle;

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// What to do once a task succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Keep going until every task reached a terminal outcome.
    #[default]
    RunToCompletion,
    /// Cancel everything else and exit as soon as one task succeeds.
    ExitImmediately,
}

/// Propagator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagatorConfig {
    pub policy: ExitPolicy,
    pub grace_period: Duration,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            policy: ExitPolicy::RunToCompletion,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Policy is run-to-completion; never fires.
    Inert,
    /// Waiting for the first success.
    Watching,
    /// Already fired once.
    Fired,
}

/// What the cancellation sequence did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationReport {
    /// Task whose success triggered the cancellation.
    pub winner: TaskId,
    /// Tasks that held a slot when termination was requested.
    pub terminated: Vec<TaskId>,
    /// Tasks whose groups were still alive after the grace period.
    pub force_killed: Vec<TaskId>,
    /// Tasks that were never admitted.
    pub never_started: Vec<TaskId>,
    /// Time spent between the success and the end of the sequence.
    pub elapsed: Duration,
}

/// Terminal action of the cancellation state machine.
#[derive(Debug)]
pub struct HardStop {
    pub report: CancellationReport,
}

impl HardStop {
    /// Exit status of the orchestrator: a solution was found.
    pub fn exit_code(&self) -> i32 {
        0
    }

    /// Terminate the process immediately.
    ///
    /// Destructors and runtime shutdown are skipped on purpose; worker
    /// processes have already been signalled and killed.
    pub fn execute(self) -> ! {
        info!(winner = %self.report.winner, "Exiting immediately");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        std::process::exit(self.exit_code())
    }
}

/// Watches the outcome stream and tears the pool down on first success.
pub struct CancellationPropagator {
    config: PropagatorConfig,
    stop: PoolStopHandle,
    phase: Phase,
}

impl CancellationPropagator {
    /// Create a propagator for the pool behind `stop`.
    pub fn new(config: PropagatorConfig, stop: PoolStopHandle) -> Self {
        let phase = match config.policy {
            ExitPolicy::RunToCompletion => Phase::Inert,
            ExitPolicy::ExitImmediately => Phase::Watching,
        };
        Self {
            config,
            stop,
            phase,
        }
    }

    /// Returns true if this propagator can still fire.
    pub fn is_armed(&self) -> bool {
        self.phase == Phase::Watching
    }

    /// Inspect one outcome; on the first success run the cancellation sequence.
    pub async fn intercept(&mut self, outcome: &WorkerOutcome) -> Option<HardStop> {
        if self.phase != Phase::Watching || !outcome.status.is_success() {
            return None;
        }
        self.phase = Phase::Fired;
        let report = self.cancel_remaining(outcome.task_id).await;
        Some(HardStop { report })
    }

    async fn cancel_remaining(&self, winner: TaskId) -> CancellationReport {
        let started = Instant::now();
        let state = self.stop.state().clone();

        // Steps 1 and 2: close admission and ask running slots to forward SIGTERM.
        self.stop.hard_stop(Signal::SIGTERM);
        let terminated = state.running();
        info!(
            winner = %winner,
            running = terminated.len(),
            grace_ms = self.config.grace_period.as_millis() as u64,
            "Solution found, cancelling remaining workers"
        );

        // Step 3.
        tokio::time::sleep(self.config.grace_period).await;

        // Step 4: anything still alive gets SIGKILL, including descendants
        // the winner left behind.
        let mut force_killed = Vec::new();
        for (task_id, group) in state.groups() {
            if !group.is_alive() {
                continue;
            }
            match group.signal(Signal::SIGKILL) {
                Ok(()) => {
                    warn!(task_id = %task_id, pgid = group.id(), "Force killed process group");
                    force_killed.push(task_id);
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to force kill"),
            }
        }

        CancellationReport {
            winner,
            terminated,
            force_killed,
            never_started: state.pending(),
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use swarmrun_core::{OutcomeStatus, TaskSpec, TaskState};

    use crate::pool::ProcessPool;
    use crate::wrapper::WrapperConfig;

    fn write_agent(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("agent.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn pool(dir: &Path, agent: &Path, n: usize, width: usize) -> ProcessPool {
        let tasks = TaskSpec::batch(n, &dir.join("problem.txt"), agent, None, &[]);
        let config = WrapperConfig::new(dir.join("logs")).with_interpreter("/bin/sh");
        ProcessPool::new(width, tasks, config)
            .unwrap()
            .with_exit_policy(ExitPolicy::ExitImmediately)
    }

    fn immediate(grace: Duration) -> PropagatorConfig {
        PropagatorConfig {
            policy: ExitPolicy::ExitImmediately,
            grace_period: grace,
        }
    }

    #[tokio::test]
    async fn test_inert_policy_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), Path::new("/bin/true"), 2, 2);
        let stop = pool.stop_handle();
        let mut propagator = CancellationPropagator::new(PropagatorConfig::default(), stop.clone());

        let success = WorkerOutcome::new(TaskId::new(0), OutcomeStatus::Succeeded);
        assert!(!propagator.is_armed());
        assert!(propagator.intercept(&success).await.is_none());
        assert!(!stop.is_stopped());
    }

    #[tokio::test]
    async fn test_ignores_non_success() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), Path::new("/bin/true"), 1, 1);
        let stop = pool.stop_handle();
        let mut propagator = CancellationPropagator::new(immediate(Duration::ZERO), stop.clone());

        for status in [
            OutcomeStatus::CompletedNoSolution,
            OutcomeStatus::Failed,
            OutcomeStatus::TimedOut,
        ] {
            let outcome = WorkerOutcome::new(TaskId::new(0), status);
            assert!(propagator.intercept(&outcome).await.is_none());
        }
        assert!(propagator.is_armed());
        assert!(!stop.is_stopped());
    }

    #[tokio::test]
    async fn test_first_success_cancels_running_and_freezes_queue() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(
            dir.path(),
            "case \"$3\" in\n  *agent_01.log)\n    sleep 0.3\n    echo 'Found a correct solution in run 1.'\n    echo 42\n    ;;\n  *) sleep 30 ;;\nesac\n",
        );
        let pool = pool(dir.path(), &agent, 5, 2);
        let state = pool.state();
        let mut propagator = CancellationPropagator::new(
            immediate(Duration::from_millis(300)),
            pool.stop_handle(),
        );
        let mut stream = pool.start();

        let hard_stop = loop {
            let outcome = stream.next().await.unwrap();
            if let Some(hard_stop) = propagator.intercept(&outcome).await {
                break hard_stop;
            }
        };

        let report = hard_stop.report;
        assert_eq!(report.winner, TaskId::new(1));
        assert_eq!(report.terminated, vec![TaskId::new(0)]);
        assert_eq!(
            report.never_started,
            vec![TaskId::new(2), TaskId::new(3), TaskId::new(4)]
        );
        assert!(report.elapsed < Duration::from_secs(5));
        assert!(!propagator.is_armed());

        // Everything that was running surfaces as cancelled.
        while let Some(outcome) = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
        {
            assert_eq!(outcome.status, OutcomeStatus::Cancelled);
            assert_eq!(outcome.task_id, TaskId::new(0));
        }
        assert_eq!(state.state_of(TaskId::new(2)), Some(TaskState::Pending));
        assert_eq!(state.state_of(TaskId::new(3)), Some(TaskState::Pending));
        assert_eq!(state.state_of(TaskId::new(4)), Some(TaskState::Pending));
    }

    #[tokio::test]
    async fn test_sigterm_ignoring_agent_is_force_killed() {
        let dir = tempfile::tempdir().unwrap();
        let touched = dir.path().join("survived");
        let agent = write_agent(
            dir.path(),
            &format!(
                "case \"$3\" in\n  *agent_00.log)\n    sleep 0.3\n    echo 'Found a correct solution in run 1.'\n    echo 1\n    ;;\n  *)\n    trap '' TERM\n    sleep 1.5\n    touch '{}'\n    ;;\nesac\n",
                touched.display()
            ),
        );
        let pool = pool(dir.path(), &agent, 2, 2);
        let mut propagator = CancellationPropagator::new(
            immediate(Duration::from_millis(200)),
            pool.stop_handle(),
        );
        let mut stream = pool.start();

        let hard_stop = loop {
            let outcome = stream.next().await.unwrap();
            if let Some(hard_stop) = propagator.intercept(&outcome).await {
                break hard_stop;
            }
        };
        assert_eq!(hard_stop.report.force_killed, vec![TaskId::new(1)]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!touched.exists(), "agent survived the forced kill");
    }
}
