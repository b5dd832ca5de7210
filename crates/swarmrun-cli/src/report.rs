//! Human-readable progress and summary output.
//!
//! Every function routes to [`crate::json_output`] when JSON mode is on.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use swarmrun_core::{OutcomeStatus, RunId, TaskId, WorkerOutcome};
use swarmrun_worker::{list_artifacts, CancellationReport, RunSummary, Winner};

use crate::config::Config;
use crate::json_output;

const RULE: usize = 50;

fn rule(ch: char, width: usize) -> String {
    std::iter::repeat(ch).take(width).collect()
}

fn agent(id: TaskId) -> String {
    format!("[Agent {}]", id.padded())
}

/// Status line for one outcome.
pub fn status_text(outcome: &WorkerOutcome) -> String {
    match outcome.status {
        OutcomeStatus::Succeeded => "FOUND CORRECT SOLUTION!".to_string(),
        OutcomeStatus::CompletedNoSolution => {
            "COMPLETED SUCCESSFULLY (no solution found)".to_string()
        }
        OutcomeStatus::Failed => match outcome.exit_code {
            Some(code) => format!("FAILED (return code: {code})"),
            None => "FAILED (killed by signal)".to_string(),
        },
        OutcomeStatus::TimedOut => "TIMED OUT".to_string(),
        OutcomeStatus::Cancelled => "CANCELLED".to_string(),
        OutcomeStatus::SpawnError => "FAILED TO START".to_string(),
    }
}

/// Run parameters printed before anything starts.
pub fn banner(config: &Config, run_id: &RunId) {
    if json_output::is_json_mode() {
        json_output::emit_run_started(
            run_id,
            config.num_agents,
            config.pool_width(),
            config.exit_immediately,
        );
        return;
    }
    print!("{}", banner_text(config));
}

fn banner_text(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Starting {} parallel agents...", config.num_agents);
    let _ = writeln!(out, "Problem file: {}", config.problem_file.display());
    let _ = writeln!(out, "Agent file: {}", config.agent_file.display());
    let _ = writeln!(out, "Log directory: {}", config.log_dir.display());
    let _ = writeln!(
        out,
        "Exit behavior: {} when solution found",
        if config.exit_immediately {
            "Immediate exit"
        } else {
            "Run all agents to completion"
        }
    );
    if let Some(timeout) = config.timeout {
        let _ = writeln!(out, "Timeout per agent: {} seconds", timeout.as_secs());
    }
    let _ = writeln!(out, "Max workers: {}", config.pool_width());
    if !config.exit_immediately {
        let _ = writeln!(
            out,
            "Note: All agents will run to completion regardless of solution found"
        );
    }
    let _ = writeln!(out, "{}", rule('-', RULE));
    out
}

/// Progress block for one completed task.
pub fn outcome(
    outcome: &WorkerOutcome,
    first_success: Option<&Winner>,
    completed: usize,
    total: usize,
) {
    if json_output::is_json_mode() {
        json_output::emit_task_completed(outcome, completed, total);
        if let Some(winner) = first_success {
            json_output::emit_solution_found(winner);
        }
        return;
    }
    print!("{}", outcome_text(outcome, first_success.is_some(), completed, total));
}

fn outcome_text(outcome: &WorkerOutcome, first_success: bool, completed: usize, total: usize) -> String {
    let tag = agent(outcome.task_id);
    let mut out = String::new();
    if first_success {
        let _ = writeln!(out, "\nSOLUTION FOUND by Agent {}!", outcome.task_id.padded());
    }
    let _ = writeln!(out, "{tag} {}", status_text(outcome));
    if !outcome.stdout.trim().is_empty() {
        let _ = writeln!(out, "{tag} STDOUT: {}", outcome.stdout.trim());
    }
    if !outcome.stderr.trim().is_empty() {
        let _ = writeln!(out, "{tag} STDERR: {}", outcome.stderr.trim());
    }
    let _ = writeln!(out, "Progress: {completed}/{total} agents completed");
    let _ = writeln!(out, "{}", rule('-', 30));
    out
}

/// Notice printed when Ctrl-C stops the run.
pub fn interrupted() {
    if json_output::is_json_mode() {
        json_output::emit_interrupted();
        return;
    }
    println!("\nReceived interrupt signal. Shutting down gracefully...");
}

/// Block printed right before an immediate exit.
pub fn early_exit(winner: Option<&Winner>, report: &CancellationReport, elapsed: Duration) {
    if json_output::is_json_mode() {
        json_output::emit_early_exit(report, elapsed.as_secs_f64());
        return;
    }
    print!("{}", early_exit_text(winner, report, elapsed));
}

fn early_exit_text(winner: Option<&Winner>, report: &CancellationReport, elapsed: Duration) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nExiting immediately as requested...");
    let _ = writeln!(out, "\n{}", rule('=', RULE));
    let _ = writeln!(out, "EARLY EXIT SUMMARY");
    let _ = writeln!(out, "{}", rule('=', RULE));
    let _ = writeln!(out, "Correct solution found by Agent {}", report.winner.padded());
    if let Some(winner) = winner {
        let _ = writeln!(out, "Log file: {}", winner.log_path.display());
    }
    let _ = writeln!(out, "Elapsed time: {:.2} seconds", elapsed.as_secs_f64());
    if !report.terminated.is_empty() {
        let _ = writeln!(out, "Cancelled agents: {}", id_list(&report.terminated));
    }
    if !report.never_started.is_empty() {
        let _ = writeln!(out, "Never started: {}", id_list(&report.never_started));
    }
    out
}

/// Final summary block.
pub fn summary(summary: &RunSummary, log_dir: &Path) {
    if json_output::is_json_mode() {
        json_output::emit_run_finished(summary, log_dir);
        return;
    }
    print!("{}", summary_text(summary, log_dir));
}

fn summary_text(summary: &RunSummary, log_dir: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule('=', RULE));
    let _ = writeln!(out, "FINAL SUMMARY");
    let _ = writeln!(out, "{}", rule('=', RULE));
    let _ = writeln!(
        out,
        "Total execution time: {:.2} seconds",
        summary.elapsed.as_secs_f64()
    );
    let _ = writeln!(out, "Total agents: {}", summary.total);
    let _ = writeln!(out, "Successful agents: {}", summary.clean_exits().len());
    let _ = writeln!(out, "Failed agents: {}", summary.failed.len());
    let _ = writeln!(out, "Success rate: {:.1}%", summary.success_rate());
    for status in OutcomeStatus::ALL {
        let _ = writeln!(out, "  {:<22} {}", status.as_str(), summary.count(status));
    }
    if summary.interrupted {
        let _ = writeln!(
            out,
            "Run stopped early: {}/{} agents reported",
            summary.completed, summary.total
        );
    }

    if let Some(winner) = &summary.winner {
        let _ = writeln!(out, "\nSOLUTION FOUND by Agent {}!", winner.task_id.padded());
        let _ = writeln!(out, "Log file with solution: {}", winner.log_path.display());
        if winner.payload.is_empty() {
            let _ = writeln!(out, "Could not extract a solution block from the log file");
        } else {
            let _ = writeln!(out, "\nSOLUTION FOUND:");
            let _ = writeln!(out, "{}", rule('=', RULE));
            let _ = writeln!(out, "{}", winner.payload);
            let _ = writeln!(out, "{}", rule('=', RULE));
        }
    }

    let _ = writeln!(out, "\nSuccessful agent IDs: {}", id_list(&summary.clean_exits()));
    let _ = writeln!(out, "Solved agent IDs: {}", id_list(&summary.succeeded));
    let _ = writeln!(out, "Failed agent IDs: {}", id_list(&summary.failed));

    let absolute = std::fs::canonicalize(log_dir).unwrap_or_else(|_| log_dir.to_path_buf());
    let _ = writeln!(out, "\nLog files are available in: {}", absolute.display());
    if let Ok(files) = list_artifacts(log_dir) {
        if !files.is_empty() {
            let _ = writeln!(out, "\nGenerated log files:");
            for (name, size) in files {
                let _ = writeln!(out, "  {name} ({size} bytes)");
            }
        }
    }
    out
}

fn id_list<T: std::fmt::Display>(ids: &[T]) -> String {
    let items: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}
