//! Error types for the orchestration engine.
//!
//! Only setup problems surface as errors. Anything that goes wrong inside a
//! single task is reported as a [`swarmrun_core::WorkerOutcome`] instead.

use std::path::PathBuf;

use swarmrun_core::CoreError;
use thiserror::Error;

/// Errors that stop a run from starting.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The log directory could not be created.
    #[error("Failed to create log directory '{path}': {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pool could not be created with the requested shape.
    #[error("Cannot create worker pool: {0}")]
    Pool(#[from] CoreError),

    /// Delivering a signal to a process group failed.
    #[error("Failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: nix::errno::Errno,
    },
}
