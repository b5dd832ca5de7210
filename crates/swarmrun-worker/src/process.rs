//! Process-group signalling.
//!
//! Agents are spawned as leaders of their own process group so that a single
//! `killpg` reaches every descendant, not only the direct child.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::error::WorkerError;

/// Process group led by one agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    /// Group of a child spawned with `process_group(0)`; its pgid equals its pid.
    ///
    /// Returns `None` once the child has been reaped.
    pub fn of_leader(child: &tokio::process::Child) -> Option<Self> {
        child.id().map(|pid| Self {
            pgid: Pid::from_raw(pid as i32),
        })
    }

    /// Wrap a raw process group id.
    pub fn from_raw(pgid: i32) -> Self {
        Self {
            pgid: Pid::from_raw(pgid),
        }
    }

    /// Raw process group id.
    pub fn id(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// Deliver `signal` to every member of the group.
    ///
    /// An already-empty group is not an error.
    pub fn signal(&self, signal: Signal) -> Result<(), WorkerError> {
        match killpg(self.pgid, signal) {
            Ok(()) => {
                debug!(pgid = self.id(), signal = ?signal, "Signalled process group");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                trace!(pgid = self.id(), signal = ?signal, "Process group already gone");
                Ok(())
            }
            Err(source) => Err(WorkerError::Signal {
                pgid: self.id(),
                source,
            }),
        }
    }

    /// Returns true while any member of the group is still alive.
    pub fn is_alive(&self) -> bool {
        // Signal 0 performs the permission and existence checks only.
        match killpg(self.pgid, None::<Signal>) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

impl std::fmt::Display for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pgid)
    }
}
