//! Result aggregation.
//!
//! Buckets outcomes by status as they arrive, extracts the solution payload
//! of the first successful task from its log artifact, and produces the
//! final summary and exit status.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use swarmrun_core::{solution, OutcomeStatus, TaskId, WorkerOutcome};
use tracing::{info, warn};

use crate::artifact::LogArtifact;

/// The first task that found a solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub task_id: TaskId,
    /// Log artifact holding the solution.
    pub log_path: PathBuf,
    /// Extracted solution block; empty when the marker was seen but no
    /// block could be parsed.
    pub payload: String,
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Number of tasks in the run.
    pub total: usize,
    /// Outcomes received.
    pub completed: usize,
    /// Outcome count per status; every status is present.
    pub counts: BTreeMap<OutcomeStatus, usize>,
    pub elapsed: Duration,
    /// Tasks that found a solution, sorted.
    pub succeeded: Vec<TaskId>,
    /// Tasks that exited 0 without a solution, sorted.
    pub no_solution: Vec<TaskId>,
    /// Tasks that failed, timed out, could not start or were cancelled, sorted.
    pub failed: Vec<TaskId>,
    pub winner: Option<Winner>,
    /// The run was stopped before every task reported.
    pub interrupted: bool,
}

impl RunSummary {
    /// Process exit status: 0 if any task succeeded, else 1.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded.is_empty() {
            1
        } else {
            0
        }
    }

    /// Count for one status.
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Tasks whose agent exited 0, sorted.
    pub fn clean_exits(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .succeeded
            .iter()
            .chain(self.no_solution.iter())
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Percentage of tasks whose agent exited 0.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.succeeded.len() + self.no_solution.len()) as f64 / self.total as f64 * 100.0
    }
}

/// Consumes outcomes and builds the run summary.
pub struct ResultAggregator {
    total: usize,
    log_dir: PathBuf,
    started: Instant,
    buckets: BTreeMap<OutcomeStatus, Vec<TaskId>>,
    completed: usize,
    winner: Option<Winner>,
    interrupted: bool,
}

impl ResultAggregator {
    /// Aggregator for `total` tasks writing artifacts into `log_dir`.
    pub fn new(total: usize, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            total,
            log_dir: log_dir.into(),
            started: Instant::now(),
            buckets: BTreeMap::new(),
            completed: 0,
            winner: None,
            interrupted: false,
        }
    }

    /// Outcomes received so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Number of tasks in the run.
    pub fn total(&self) -> usize {
        self.total
    }

    /// The first successful task, once known.
    pub fn winner(&self) -> Option<&Winner> {
        self.winner.as_ref()
    }

    /// Wall-clock time since the aggregator was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Flag the run as stopped early.
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Record one outcome.
    ///
    /// Returns the winner when this outcome is the first success.
    pub async fn record(&mut self, outcome: &WorkerOutcome) -> Option<&Winner> {
        self.completed += 1;
        self.buckets
            .entry(outcome.status)
            .or_default()
            .push(outcome.task_id);

        if !outcome.status.is_success() || self.winner.is_some() {
            return None;
        }

        let artifact = LogArtifact::for_task(&self.log_dir, outcome.task_id);
        let payload = extract_payload(&artifact, outcome).await;
        info!(
            task_id = %outcome.task_id,
            payload_len = payload.len(),
            "Solution found"
        );
        self.winner = Some(Winner {
            task_id: outcome.task_id,
            log_path: artifact.path().to_path_buf(),
            payload,
        });
        self.winner.as_ref()
    }

    /// Build the summary of everything recorded so far.
    pub fn summary(&self) -> RunSummary {
        let failures: Vec<OutcomeStatus> = OutcomeStatus::ALL
            .into_iter()
            .filter(OutcomeStatus::is_failure)
            .collect();
        let sorted = |statuses: &[OutcomeStatus]| {
            let mut ids: Vec<TaskId> = statuses
                .iter()
                .filter_map(|s| self.buckets.get(s))
                .flatten()
                .copied()
                .collect();
            ids.sort();
            ids
        };

        RunSummary {
            total: self.total,
            completed: self.completed,
            counts: OutcomeStatus::ALL
                .iter()
                .map(|s| (*s, self.buckets.get(s).map_or(0, Vec::len)))
                .collect(),
            elapsed: self.elapsed(),
            succeeded: sorted(&[OutcomeStatus::Succeeded]),
            no_solution: sorted(&[OutcomeStatus::CompletedNoSolution]),
            failed: sorted(&failures),
            winner: self.winner.clone(),
            interrupted: self.interrupted || self.completed < self.total,
        }
    }

    /// Directory holding the artifacts.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Payload from the artifact, then from captured stdout, else empty.
async fn extract_payload(artifact: &LogArtifact, outcome: &WorkerOutcome) -> String {
    let from_log = match artifact.read().await {
        Ok(log) => solution::extract_solution(&log),
        Err(e) => {
            warn!(
                task_id = %outcome.task_id,
                path = %artifact.path().display(),
                error = %e,
                "Could not read log artifact"
            );
            None
        }
    };

    match from_log.or_else(|| solution::extract_solution(&outcome.stdout)) {
        Some(found) => found.text,
        None => {
            warn!(task_id = %outcome.task_id, "Success marker without a solution block");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use swarmrun_core::TaskSpec;

    use crate::pool::ProcessPool;
    use crate::wrapper::WrapperConfig;

    fn outcome(id: usize, status: OutcomeStatus) -> WorkerOutcome {
        WorkerOutcome::new(TaskId::new(id), status)
    }

    #[tokio::test]
    async fn test_no_solution_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = ResultAggregator::new(3, dir.path());
        for id in [2, 0, 1] {
            assert!(aggregator
                .record(&outcome(id, OutcomeStatus::CompletedNoSolution))
                .await
                .is_none());
        }

        let summary = aggregator.summary();
        assert_eq!(summary.count(OutcomeStatus::CompletedNoSolution), 3);
        assert_eq!(summary.count(OutcomeStatus::Succeeded), 0);
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.winner.is_none());
        assert!(summary.failed.is_empty());
        assert_eq!(
            summary.clean_exits(),
            vec![TaskId::new(0), TaskId::new(1), TaskId::new(2)]
        );
        assert!(!summary.interrupted);
        assert!((summary.success_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_winner_payload_from_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agent_02.log"),
            "step 1\nFound a correct solution in run 4.\n42\n\n>>>>>>> STDOUT\n",
        )
        .unwrap();

        let mut aggregator = ResultAggregator::new(3, dir.path());
        aggregator.record(&outcome(0, OutcomeStatus::CompletedNoSolution)).await;
        let winner = aggregator
            .record(&outcome(2, OutcomeStatus::Succeeded))
            .await
            .cloned()
            .unwrap();
        aggregator.record(&outcome(1, OutcomeStatus::CompletedNoSolution)).await;

        assert_eq!(winner.task_id, TaskId::new(2));
        assert_eq!(winner.payload, "42");
        assert_eq!(winner.log_path, dir.path().join("agent_02.log"));

        let summary = aggregator.summary();
        assert_eq!(summary.succeeded, vec![TaskId::new(2)]);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_marker_without_block_gives_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = ResultAggregator::new(1, dir.path());
        let success = outcome(0, OutcomeStatus::Succeeded)
            .with_output("Found a correct solution in run 1.\n".to_string(), String::new());

        let winner = aggregator.record(&success).await.cloned().unwrap();
        assert_eq!(winner.payload, "");
        assert_eq!(aggregator.summary().exit_code(), 0);
    }

    #[tokio::test]
    async fn test_payload_falls_back_to_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = ResultAggregator::new(1, dir.path());
        let success = outcome(0, OutcomeStatus::Succeeded).with_output(
            "Found a correct solution in run 1.\nx = 3\n".to_string(),
            String::new(),
        );
        assert_eq!(aggregator.record(&success).await.unwrap().payload, "x = 3");
    }

    #[tokio::test]
    async fn test_only_first_success_is_winner() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = ResultAggregator::new(2, dir.path());
        assert!(aggregator.record(&outcome(1, OutcomeStatus::Succeeded)).await.is_some());
        assert!(aggregator.record(&outcome(0, OutcomeStatus::Succeeded)).await.is_none());

        let summary = aggregator.summary();
        assert_eq!(summary.winner.unwrap().task_id, TaskId::new(1));
        assert_eq!(summary.succeeded, vec![TaskId::new(0), TaskId::new(1)]);
    }

    #[tokio::test]
    async fn test_failure_buckets_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut aggregator = ResultAggregator::new(5, dir.path());
        aggregator.record(&outcome(4, OutcomeStatus::TimedOut)).await;
        aggregator.record(&outcome(1, OutcomeStatus::SpawnError)).await;
        aggregator.record(&outcome(3, OutcomeStatus::Failed)).await;
        aggregator.mark_interrupted();

        let summary = aggregator.summary();
        assert_eq!(
            summary.failed,
            vec![TaskId::new(1), TaskId::new(3), TaskId::new(4)]
        );
        assert_eq!(summary.count(OutcomeStatus::Cancelled), 0);
        assert_eq!(summary.counts.len(), OutcomeStatus::ALL.len());
        assert_eq!(summary.completed, 3);
        assert!(summary.interrupted);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_single_solver_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path().join("agent.sh");
        std::fs::write(
            &agent,
            "case \"$3\" in\n  *agent_01.log)\n    echo 'Found a correct solution in run 3.'\n    echo 42\n    ;;\n  *) echo 'nothing here' ;;\nesac\n",
        )
        .unwrap();
        let log_dir = dir.path().join("logs");
        let tasks = TaskSpec::batch(3, &dir.path().join("problem.txt"), &agent, None, &[]);
        let config = WrapperConfig::new(&log_dir).with_interpreter("/bin/sh");
        let pool = ProcessPool::new(3, tasks, config).unwrap();
        let state: Arc<_> = pool.state();

        let mut aggregator = ResultAggregator::new(3, &log_dir);
        let mut stream = pool.start();
        while let Some(outcome) = stream.next().await {
            aggregator.record(&outcome).await;
        }

        let summary = aggregator.summary();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.count(OutcomeStatus::Succeeded), 1);
        assert_eq!(summary.count(OutcomeStatus::CompletedNoSolution), 2);
        assert_eq!(summary.succeeded, vec![TaskId::new(1)]);
        assert!(summary.failed.is_empty());
        assert!(!summary.interrupted);
        assert_eq!(summary.exit_code(), 0);

        let winner = summary.winner.unwrap();
        assert_eq!(winner.task_id, TaskId::new(1));
        assert_eq!(winner.payload, "42");
        assert_eq!(winner.log_path, log_dir.join("agent_01.log"));
        assert!(state.pending().is_empty());
        assert!(state.running().is_empty());
    }
}
