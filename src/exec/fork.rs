//! fork(2) as a three-way outcome.

use nix::errno::Errno;
use nix::unistd::{fork, ForkResult, Pid};

/// Result of forking, one variant per branch the caller must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// No child was created.
    Failed(Errno),
    /// Running in the new child.
    Child,
    /// Running in the parent; the child has this pid.
    Parent(Pid),
}

/// Process-creation seam for the exec core.
pub trait Forker {
    /// Create a child process.
    ///
    /// # Safety
    ///
    /// In a multi-threaded process the `Child` branch may only perform
    /// async-signal-safe operations until it execs or exits.
    unsafe fn fork(&self) -> ForkOutcome;
}

/// Forks the real process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemForker;

impl Forker for SystemForker {
    unsafe fn fork(&self) -> ForkOutcome {
        match fork() {
            Ok(ForkResult::Child) => ForkOutcome::Child,
            Ok(ForkResult::Parent { child }) => ForkOutcome::Parent(child),
            Err(errno) => ForkOutcome::Failed(errno),
        }
    }
}
