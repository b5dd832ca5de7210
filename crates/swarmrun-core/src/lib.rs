//! swarmrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Process spawning or signals
//! - The async runtime
//!
//! All types here describe one orchestration run: the immutable task
//! descriptors, their lifecycle states, the outcome each task produces,
//! and the solution marker contract with the agent program.

pub mod error;
pub mod ids;
pub mod outcome;
pub mod solution;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use outcome::WorkerOutcome;
pub use solution::{Solution, SolutionRecord, SECTION_DELIMITER, SUCCESS_MARKER};
pub use status::{OutcomeStatus, TaskState};
pub use task::TaskSpec;
