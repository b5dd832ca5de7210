//! Worker process wrapper.
//!
//! Owns one task's agent process from spawn to exit: starts it as the leader
//! of a fresh process group, enforces the timeout, forwards termination
//! requests to the whole group, captures its output and classifies the exit.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use swarmrun_core::{solution, OutcomeStatus, TaskSpec, WorkerOutcome};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::artifact::LogArtifact;
use crate::process::ProcessGroup;
use crate::state::{PoolState, TerminationReceiver};

/// How long to wait for stdout/stderr to close after the leader exited.
///
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings shared by every wrapper in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperConfig {
    /// Directory holding one log artifact per task.
    pub log_dir: PathBuf,

    /// Program used to launch the agent (e.g. `python3`). `None` executes
    /// the agent program directly.
    pub interpreter: Option<PathBuf>,

    /// Working directory for the agent. `None` inherits ours.
    pub working_dir: Option<PathBuf>,
}

impl WrapperConfig {
    /// Create a config writing artifacts to `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            interpreter: None,
            working_dir: None,
        }
    }

    /// Set the interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// How the agent process stopped.
enum Exit {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Terminated(Signal),
}

/// Supervises one task's agent process.
pub struct WorkerWrapper {
    task: TaskSpec,
    config: Arc<WrapperConfig>,
    artifact: LogArtifact,
    /// Group of the running agent; private to this wrapper.
    group: Option<ProcessGroup>,
}

impl WorkerWrapper {
    /// Create a wrapper for `task`.
    pub fn new(task: TaskSpec, config: Arc<WrapperConfig>) -> Self {
        let artifact = LogArtifact::for_task(&config.log_dir, task.id);
        Self {
            task,
            config,
            artifact,
            group: None,
        }
    }

    /// Build the agent command line.
    ///
    /// `[interpreter] <agent> <input> --log <artifact> --other_prompts <p1,p2>`
    pub fn command(&self) -> Command {
        let mut cmd = match &self.config.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.task.agent_program);
                cmd
            }
            None => Command::new(&self.task.agent_program),
        };

        cmd.arg(&self.task.input_path)
            .arg("--log")
            .arg(self.artifact.path())
            .arg("--other_prompts")
            .arg(self.task.joined_prompts());

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run the task to its single outcome.
    pub(crate) async fn run(
        mut self,
        mut termination: TerminationReceiver,
        state: Arc<PoolState>,
    ) -> WorkerOutcome {
        let task_id = self.task.id;
        let started = Instant::now();

        // A stop may have been requested between admission and now.
        let requested = *termination.borrow_and_update();
        if let Some(signal) = requested {
            info!(task_id = %task_id, signal = ?signal, "Termination requested before spawn");
            return WorkerOutcome::new(task_id, OutcomeStatus::Cancelled)
                .with_output(String::new(), format!("terminated by {signal:?} before start"));
        }

        if let Err(e) = self.artifact.reset().await {
            warn!(task_id = %task_id, error = %e, "Failed to reset log artifact");
        }

        let spawned = {
            let mut cmd = self.command();
            debug!(task_id = %task_id, command = ?cmd, "Spawning agent");
            cmd.spawn()
        };

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to spawn agent");
                return WorkerOutcome::spawn_error(
                    task_id,
                    format!("Agent {} failed with error: {}", task_id.padded(), e),
                )
                .with_duration(started.elapsed());
            }
        };

        self.group = ProcessGroup::of_leader(&child);
        if let Some(group) = self.group {
            state.attach_group(task_id, group);
        }
        info!(task_id = %task_id, pgid = ?self.group.map(|g| g.id()), "Agent spawned");

        let stdout = OutputReader::spawn(child.stdout.take());
        let stderr = OutputReader::spawn(child.stderr.take());

        let exit = self.supervise(&mut child, &mut termination).await;

        match exit {
            Exit::Terminated(signal) => {
                self.forward(signal);
                info!(task_id = %task_id, signal = ?signal, "Agent cancelled");
                stdout.abort();
                stderr.abort();
                WorkerOutcome::new(task_id, OutcomeStatus::Cancelled)
                    .with_output(String::new(), format!("terminated by {signal:?}"))
                    .with_duration(started.elapsed())
            }
            Exit::TimedOut(limit) => {
                self.forward(Signal::SIGKILL);
                if let Err(e) = child.wait().await {
                    warn!(task_id = %task_id, error = %e, "Failed to reap timed out agent");
                }
                let (out, mut err) = drain(stdout, stderr).await;
                self.persist(&out, &err).await;
                warn!(task_id = %task_id, timeout_secs = limit.as_secs_f64(), "Agent timed out");

                if !err.is_empty() && !err.ends_with('\n') {
                    err.push('\n');
                }
                err.push_str(&format!(
                    "Agent {} timed out after {} seconds",
                    task_id.padded(),
                    limit.as_secs_f64()
                ));
                WorkerOutcome::new(task_id, OutcomeStatus::TimedOut)
                    .with_output(out, err)
                    .with_duration(started.elapsed())
            }
            Exit::Exited(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Failed to wait on agent");
                self.forward(Signal::SIGKILL);
                stdout.abort();
                stderr.abort();
                WorkerOutcome::new(task_id, OutcomeStatus::Failed)
                    .with_output(
                        String::new(),
                        format!("Agent {} failed with error: {}", task_id.padded(), e),
                    )
                    .with_duration(started.elapsed())
            }
            Exit::Exited(Ok(status)) => {
                let (out, err) = drain(stdout, stderr).await;
                match self.group.take() {
                    Some(group) if group.is_alive() => {
                        debug!(task_id = %task_id, pgid = group.id(), "Agent left descendants running");
                    }
                    _ => state.release_group(task_id),
                }
                self.persist(&out, &err).await;

                let code = status.code();
                let status = self.classify(status, &out).await;
                info!(task_id = %task_id, exit_code = ?code, status = %status, "Agent finished");
                WorkerOutcome::new(task_id, status)
                    .with_exit_code(code)
                    .with_output(out, err)
                    .with_duration(started.elapsed())
            }
        }
    }

    async fn supervise(&self, child: &mut Child, termination: &mut TerminationReceiver) -> Exit {
        let timeout = self.task.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => Exit::Exited(status),
            limit = deadline => Exit::TimedOut(limit),
            signal = wait_for_termination(termination) => Exit::Terminated(signal),
        }
    }

    /// Forward `signal` to the owned process group.
    fn forward(&self, signal: Signal) {
        let Some(group) = self.group else {
            return;
        };
        if let Err(e) = group.signal(signal) {
            warn!(task_id = %self.task.id, error = %e, "Failed to forward signal");
        }
    }

    async fn persist(&self, stdout: &str, stderr: &str) {
        if let Err(e) = self.artifact.append_streams(stdout, stderr).await {
            warn!(
                task_id = %self.task.id,
                path = %self.artifact.path().display(),
                error = %e,
                "Failed to write log artifact"
            );
        }
    }

    /// Classify a natural exit.
    ///
    /// Exit code 0 scans stdout for the success marker and falls back to the
    /// log artifact when stdout is inconclusive.
    async fn classify(&self, status: ExitStatus, stdout: &str) -> OutcomeStatus {
        if !status.success() {
            return OutcomeStatus::Failed;
        }
        if solution::contains_marker(stdout) {
            return OutcomeStatus::Succeeded;
        }
        match self.artifact.read().await {
            Ok(log) if solution::contains_marker(&log) => OutcomeStatus::Succeeded,
            Ok(_) => OutcomeStatus::CompletedNoSolution,
            Err(e) => {
                debug!(task_id = %self.task.id, error = %e, "Log artifact unreadable");
                OutcomeStatus::CompletedNoSolution
            }
        }
    }
}

/// Resolve once a termination signal has been requested for this slot.
async fn wait_for_termination(termination: &mut TerminationReceiver) -> Signal {
    loop {
        if let Some(signal) = *termination.borrow_and_update() {
            return signal;
        }
        if termination.changed().await.is_err() {
            // The pool dropped the slot; nobody can ask us to stop anymore.
            return std::future::pending().await;
        }
    }
}

/// Collects one output stream in the background.
///
/// Bytes land in a shared buffer as they arrive, so abandoning the reader
/// still leaves everything read so far.
struct OutputReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl OutputReader {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let handle = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "Error reading agent output");
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    /// Wait up to `limit` for end of stream, then return what was captured.
    async fn finish(mut self, limit: Duration) -> String {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Output reader failed"),
            Err(_) => {
                self.handle.abort();
                debug!("Output pipe still open after agent exit; keeping partial output");
            }
        }
        self.captured()
    }

    fn abort(self) {
        self.handle.abort();
    }

    fn captured(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

async fn drain(stdout: OutputReader, stderr: OutputReader) -> (String, String) {
    tokio::join!(
        stdout.finish(IO_DRAIN_TIMEOUT),
        stderr.finish(IO_DRAIN_TIMEOUT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use swarmrun_core::TaskId;
    use tokio::sync::watch;

    /// Write a shell agent into `dir` and return its path.
    fn write_agent(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("agent.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn wrapper(dir: &Path, agent: &Path, timeout: Option<Duration>) -> WorkerWrapper {
        let task = TaskSpec::new(TaskId::new(0), dir.join("problem.txt"), agent)
            .with_timeout(timeout)
            .with_prompts(vec!["a".to_string(), "b".to_string()]);
        let config = WrapperConfig::new(dir).with_interpreter("/bin/sh");
        WorkerWrapper::new(task, Arc::new(config))
    }

    async fn run_once(wrapper: WorkerWrapper) -> WorkerOutcome {
        let state = Arc::new(PoolState::new([TaskId::new(0)]));
        let (_tx, rx) = watch::channel(None);
        wrapper.run(rx, state).await
    }

    #[test]
    fn test_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let agent = dir.path().join("agent.py");
        let cmd = wrapper(dir.path(), &agent, None).command();
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "/bin/sh");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], agent.display().to_string());
        assert_eq!(args[1], dir.path().join("problem.txt").display().to_string());
        assert_eq!(args[2], "--log");
        assert_eq!(args[3], dir.path().join("agent_00.log").display().to_string());
        assert_eq!(args[4], "--other_prompts");
        assert_eq!(args[5], "a,b");
    }

    #[tokio::test]
    async fn test_success_marker_on_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(
            dir.path(),
            "echo 'Found a correct solution in run 1.'\necho 42\n",
        );
        let outcome = run_once(wrapper(dir.path(), &agent, None)).await;

        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("42"));

        let log = std::fs::read_to_string(dir.path().join("agent_00.log")).unwrap();
        assert!(log.contains(">>>>>>> STDOUT"));
    }

    #[tokio::test]
    async fn test_success_marker_in_agent_log_only() {
        let dir = tempfile::tempdir().unwrap();
        // $3 is the --log destination.
        let agent = write_agent(
            dir.path(),
            "printf 'Found a correct solution in run 2.\\n7\\n\\n' > \"$3\"\necho done\n",
        );
        let outcome = run_once(wrapper(dir.path(), &agent, None)).await;
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_clean_exit_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(dir.path(), "echo 'no luck'\n");
        let outcome = run_once(wrapper(dir.path(), &agent, None)).await;
        assert_eq!(outcome.status, OutcomeStatus::CompletedNoSolution);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed_even_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(
            dir.path(),
            "echo 'Found a correct solution in run 1.'\necho boom >&2\nexit 3\n",
        );
        let outcome = run_once(wrapper(dir.path(), &agent, None)).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(
            dir.path(),
            "echo 'Found a correct solution in run 1.'\nsleep 30 &\nsleep 30\n",
        );
        let started = Instant::now();
        let outcome = run_once(wrapper(dir.path(), &agent, Some(Duration::from_millis(300)))).await;

        assert_eq!(outcome.status, OutcomeStatus::TimedOut);
        assert!(outcome.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let task = TaskSpec::new(TaskId::new(0), "problem.txt", dir.path().join("missing-agent"));
        let wrapper = WorkerWrapper::new(task, Arc::new(WrapperConfig::new(dir.path())));
        let outcome = run_once(wrapper).await;

        assert_eq!(outcome.status, OutcomeStatus::SpawnError);
        assert!(outcome.stderr.contains("failed with error"));
    }

    #[tokio::test]
    async fn test_termination_request_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let touched = dir.path().join("finished");
        let agent = write_agent(
            dir.path(),
            &format!("sleep 2\ntouch '{}'\n", touched.display()),
        );
        let wrapper = wrapper(dir.path(), &agent, None);
        let state = Arc::new(PoolState::new([TaskId::new(0)]));
        let (tx, rx) = watch::channel(None);

        let handle = tokio::spawn(wrapper.run(rx, state.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(state.groups().len(), 1);
        tx.send(Some(Signal::SIGTERM)).unwrap();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        assert!(outcome.stderr.contains("SIGTERM"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!touched.exists(), "agent kept running after cancellation");
    }

    #[tokio::test]
    async fn test_termination_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(dir.path(), "exit 0\n");
        let (_tx, rx) = watch::channel(Some(Signal::SIGTERM));
        let state = Arc::new(PoolState::new([TaskId::new(0)]));

        let outcome = wrapper(dir.path(), &agent, None).run(rx, state.clone()).await;
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        assert!(state.groups().is_empty());
        assert!(!dir.path().join("agent_00.log").exists());
    }

    #[tokio::test]
    async fn test_output_kept_when_descendant_holds_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let agent = write_agent(
            dir.path(),
            "echo 'Found a correct solution in run 1.'\necho 42\nsleep 5 &\nexit 0\n",
        );
        let started = Instant::now();
        let outcome = run_once(wrapper(dir.path(), &agent, None)).await;

        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert!(outcome.stdout.contains("42"));
        assert!(started.elapsed() < IO_DRAIN_TIMEOUT + Duration::from_millis(1500));

        let log = std::fs::read_to_string(dir.path().join("agent_00.log")).unwrap();
        let stdout_section = log.split(">>>>>>> STDOUT").nth(1).unwrap();
        assert!(stdout_section.contains("Found a correct solution in run 1."));
    }
}
