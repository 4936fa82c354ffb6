//! Shared type definitions for requests, results and errors.

use crate::utils::output::CaptureBuffer;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use thiserror::Error;

/// Diagnostic tag used by [`ExecRequest::trusted`].
pub const TRUSTED_TAG: &str = "safe_system";

/// Diagnostic tag used by [`ExecRequest::unprivileged`].
pub const UNPRIVILEGED_TAG: &str = "unpriv_system";

/// Exit code a child uses when it cannot drop credentials or exec the shell.
pub const CHILD_FAILURE_EXIT: i32 = 127;

/// Exit code recorded in the audit log for abnormal (signal) termination.
pub const ABNORMAL_EXIT_MARKER: i32 = -1;

/// A concrete uid/gid pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// Credentials the child switches to before exec.
///
/// Zero is treated the same as unset: it means "no change", never "become root".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialTarget {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl CredentialTarget {
    /// Keep the caller's current privilege.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Normalize raw ids: 0 maps to `None`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: (uid != 0).then_some(uid),
            gid: (gid != 0).then_some(gid),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

impl From<Credentials> for CredentialTarget {
    fn from(creds: Credentials) -> Self {
        Self::new(creds.uid, creds.gid)
    }
}

/// One command to run through the exec core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub target: CredentialTarget,
    pub caller_tag: String,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>, target: CredentialTarget, caller_tag: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            target,
            caller_tag: caller_tag.into(),
        }
    }

    /// Run at the caller's current effective privilege.
    pub fn trusted(command: impl Into<String>) -> Self {
        Self::new(command, CredentialTarget::unchanged(), TRUSTED_TAG)
    }

    /// Run with the given uid/gid.
    pub fn unprivileged(command: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self::new(command, CredentialTarget::new(uid, gid), UNPRIVILEGED_TAG)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.caller_tag = tag.into();
        self
    }
}

/// Output captured from a child while auditing was active.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: CaptureBuffer,
    pub stderr: CaptureBuffer,
}

/// Outcome of a reaped child.
///
/// Only ever built after `waitpid` returned the child's status, so it never
/// describes a process that is still running.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub pid: Pid,
    /// Status word exactly as reported by `waitpid(2)`.
    pub raw_wait_status: i32,
    /// Present when the call captured stdout/stderr for the audit log.
    pub capture: Option<CapturedOutput>,
}

impl ExecResult {
    pub fn wait_status(&self) -> Option<WaitStatus> {
        WaitStatus::from_raw(self.pid, self.raw_wait_status).ok()
    }

    /// Exit code for a normal exit.
    pub fn exit_code(&self) -> Option<i32> {
        if libc::WIFEXITED(self.raw_wait_status) {
            Some(libc::WEXITSTATUS(self.raw_wait_status))
        } else {
            None
        }
    }

    /// Terminating signal, if the child was killed.
    pub fn signal(&self) -> Option<Signal> {
        if libc::WIFSIGNALED(self.raw_wait_status) {
            Signal::try_from(libc::WTERMSIG(self.raw_wait_status)).ok()
        } else {
            None
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Exit code as written to the audit log.
    pub fn audit_exit_code(&self) -> i32 {
        self.exit_code().unwrap_or(ABNORMAL_EXIT_MARKER)
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("fork failed: {0}")]
    Fork(Errno),

    #[error("waitpid failed: {0}")]
    Wait(Errno),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Signal setup error: {0}")]
    Signal(String),

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Fork and wait failures: the command may or may not have run.
    pub fn is_caller_visible_failure(&self) -> bool {
        matches!(self, ExecError::Fork(_) | ExecError::Wait(_))
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
