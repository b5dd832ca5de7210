//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use swarmrun_core::{CoreError, TaskSpec};
use swarmrun_worker::{ExitPolicy, PropagatorConfig, WrapperConfig, DEFAULT_GRACE_PERIOD};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--num-agents must be at least 1")]
    NoAgents,

    #[error("--max-workers must be between 1 and {max}, got {got}")]
    PoolWidth { max: usize, got: usize },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Problem statement forwarded to every agent.
    pub problem_file: PathBuf,

    /// Number of agent instances (N).
    pub num_agents: usize,

    /// Pool width (W). `None` runs all agents at once.
    pub max_workers: Option<usize>,

    /// Per-agent timeout. `None` means unlimited.
    pub timeout: Option<Duration>,

    /// Agent program.
    pub agent_file: PathBuf,

    /// Interpreter used to launch the agent program.
    pub interpreter: Option<PathBuf>,

    /// Working directory for agents.
    pub working_dir: Option<PathBuf>,

    /// Auxiliary prompts.
    pub other_prompts: Vec<String>,

    /// Directory for per-agent log files.
    pub log_dir: PathBuf,

    /// Stop everything on the first solution.
    pub exit_immediately: bool,

    /// Wait between SIGTERM and SIGKILL when stopping early.
    pub grace_period: Duration,

    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            problem_file: PathBuf::new(),
            num_agents: 10,
            max_workers: None,
            timeout: None,
            agent_file: PathBuf::from("agent.py"),
            interpreter: None,
            working_dir: None,
            other_prompts: Vec::new(),
            log_dir: PathBuf::from("logs"),
            exit_immediately: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            json: false,
        }
    }
}

impl Config {
    /// Effective pool width.
    pub fn pool_width(&self) -> usize {
        self.max_workers.unwrap_or(self.num_agents)
    }

    /// Check the run shape before anything is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 {
            return Err(ConfigError::NoAgents);
        }
        let width = self.pool_width();
        if width == 0 || width > self.num_agents {
            return Err(ConfigError::PoolWidth {
                max: self.num_agents,
                got: width,
            });
        }
        if self.problem_file.as_os_str().is_empty() {
            return Err(CoreError::InvalidInput("problem file is required".into()).into());
        }
        Ok(())
    }

    /// One task per agent instance.
    pub fn tasks(&self) -> Vec<TaskSpec> {
        TaskSpec::batch(
            self.num_agents,
            &self.problem_file,
            &self.agent_file,
            self.timeout,
            &self.other_prompts,
        )
    }

    /// Settings shared by every worker wrapper.
    pub fn wrapper_config(&self) -> WrapperConfig {
        let mut config = WrapperConfig::new(&self.log_dir);
        if let Some(interpreter) = &self.interpreter {
            config = config.with_interpreter(interpreter);
        }
        if let Some(dir) = &self.working_dir {
            config = config.with_working_dir(dir);
        }
        config
    }

    /// Settings for the cancellation propagator.
    pub fn propagator_config(&self) -> PropagatorConfig {
        PropagatorConfig {
            policy: if self.exit_immediately {
                ExitPolicy::ExitImmediately
            } else {
                ExitPolicy::RunToCompletion
            },
            grace_period: self.grace_period,
        }
    }
}

/// Split a comma separated prompt list, dropping empty entries.
pub fn parse_prompts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Seconds to a timeout; `0` disables it.
pub fn timeout_from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}
