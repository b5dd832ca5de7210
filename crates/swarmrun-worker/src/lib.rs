//! swarmrun orchestration engine.
//!
//! Launches identical agent processes against one input, supervises them
//! with per-task timeouts, and reports their outcomes in completion order.
//!
//! - [`WorkerWrapper`] owns one task's process group from spawn to exit.
//! - [`ProcessPool`] runs at most `width` wrappers at a time and exposes an
//!   [`OutcomeStream`].
//! - [`CancellationPropagator`] tears everything down after the first
//!   success under the immediate-exit policy.
//! - [`ResultAggregator`] buckets outcomes and extracts the winning payload.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use swarmrun_core::TaskSpec;
//! use swarmrun_worker::{ProcessPool, ResultAggregator, WrapperConfig};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let tasks = TaskSpec::batch(4, Path::new("problem.txt"), Path::new("agent.py"), None, &[]);
//!     let config = WrapperConfig::new("logs").with_interpreter("python3");
//!     let mut aggregator = ResultAggregator::new(tasks.len(), "logs");
//!     let pool = ProcessPool::new(2, tasks, config)?;
//!
//!     let mut outcomes = pool.start();
//!     while let Some(outcome) = outcomes.next().await {
//!         aggregator.record(&outcome).await;
//!     }
//!     std::process::exit(aggregator.summary().exit_code());
//! }
//! ```

mod aggregator;
mod artifact;
mod error;
mod pool;
mod process;
mod propagator;
mod state;
mod wrapper;

pub use aggregator::{ResultAggregator, RunSummary, Winner};
pub use artifact::{ensure_log_dir, list_artifacts, LogArtifact};
pub use error::WorkerError;
pub use pool::{OutcomeStream, PoolStopHandle, ProcessPool};
pub use process::ProcessGroup;
pub use propagator::{
    CancellationPropagator, CancellationReport, ExitPolicy, HardStop, PropagatorConfig,
    DEFAULT_GRACE_PERIOD,
};
pub use state::PoolState;
pub use wrapper::{WorkerWrapper, WrapperConfig};

/// Re-exported so callers can name signals without depending on `nix`.
pub use nix::sys::signal::Signal;
