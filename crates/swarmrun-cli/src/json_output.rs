//! JSON output for streaming run events to stdout.

use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use swarmrun_core::{RunId, WorkerOutcome};
use swarmrun_worker::{CancellationReport, RunSummary, Winner};

/// Global flag to enable JSON output mode.
static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable JSON output mode.
pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

/// Check if JSON mode is enabled.
pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    RunStarted,
    TaskCompleted,
    SolutionFound,
    Interrupted,
    EarlyExit,
    RunFinished,
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Output this event as a JSON line to stdout.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

/// Emit a run_started event.
pub fn emit_run_started(run_id: &RunId, tasks: usize, width: usize, exit_immediately: bool) {
    JsonEvent::new(
        JsonEventType::RunStarted,
        serde_json::json!({
            "run_id": run_id.as_str(),
            "tasks": tasks,
            "width": width,
            "exit_immediately": exit_immediately,
        }),
    )
    .emit();
}

/// Emit a task_completed event.
pub fn emit_task_completed(outcome: &WorkerOutcome, completed: usize, total: usize) {
    JsonEvent::new(
        JsonEventType::TaskCompleted,
        serde_json::json!({
            "outcome": outcome,
            "completed": completed,
            "total": total,
        }),
    )
    .emit();
}

/// Emit a solution_found event.
pub fn emit_solution_found(winner: &Winner) {
    JsonEvent::new(
        JsonEventType::SolutionFound,
        serde_json::json!({
            "task_id": winner.task_id,
            "log_file": winner.log_path.display().to_string(),
            "solution": winner.payload,
        }),
    )
    .emit();
}

/// Emit an interrupted event.
pub fn emit_interrupted() {
    JsonEvent::new(JsonEventType::Interrupted, serde_json::json!({})).emit();
}

/// Emit an early_exit event.
pub fn emit_early_exit(report: &CancellationReport, elapsed_secs: f64) {
    JsonEvent::new(
        JsonEventType::EarlyExit,
        serde_json::json!({
            "winner": report.winner,
            "terminated": report.terminated,
            "force_killed": report.force_killed,
            "never_started": report.never_started,
            "elapsed_secs": elapsed_secs,
        }),
    )
    .emit();
}

/// Emit a run_finished event.
pub fn emit_run_finished(summary: &RunSummary, log_dir: &Path) {
    let counts: serde_json::Map<String, serde_json::Value> = summary
        .counts
        .iter()
        .map(|(status, count)| (status.as_str().to_string(), (*count).into()))
        .collect();

    JsonEvent::new(
        JsonEventType::RunFinished,
        serde_json::json!({
            "total": summary.total,
            "completed": summary.completed,
            "counts": counts,
            "elapsed_secs": summary.elapsed.as_secs_f64(),
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "solution": summary.winner.as_ref().map(|w| w.payload.as_str()),
            "interrupted": summary.interrupted,
            "exit_code": summary.exit_code(),
            "log_dir": log_dir.display().to_string(),
        }),
    )
    .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shape() {
        let event = JsonEvent::new(
            JsonEventType::TaskCompleted,
            serde_json::json!({ "completed": 1 }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "task_completed");
        assert_eq!(value["data"]["completed"], 1);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_task_completed_payload() {
        use swarmrun_core::{OutcomeStatus, TaskId};

        let outcome = WorkerOutcome::new(TaskId::new(3), OutcomeStatus::TimedOut);
        let data = serde_json::json!({ "outcome": &outcome, "completed": 2, "total": 5 });
        assert_eq!(data["outcome"]["task_id"], 3);
        assert_eq!(data["outcome"]["status"], "TIMED_OUT");
    }
}
