use crate::config::types::{CredentialTarget, ExecError, ExecRequest, ExecResult, Result};
use crate::config::ExecConfig;
use crate::exec::capture::{self, CapturePipes};
use crate::exec::fork::{ForkOutcome, Forker, SystemForker};
use crate::exec::preexec::{run_child, PreparedExec};
use crate::observability::audit::{AuditLog, AuditRecord};
use crate::utils::env_hygiene::TrustedEnvironment;
use nix::errno::Errno;
use nix::unistd::Pid;

/// Runs shell commands in a sanitized child and reaps them.
///
/// One instance can serve many calls; each call re-reads the audit toggle.
pub struct Executor<F: Forker = SystemForker> {
    config: ExecConfig,
    env: TrustedEnvironment,
    audit: AuditLog,
    forker: F,
}

impl Executor<SystemForker> {
    pub fn new(config: ExecConfig) -> Self {
        let audit = AuditLog::from_config(&config);
        Self {
            config,
            env: TrustedEnvironment::standard(),
            audit,
            forker: SystemForker,
        }
    }
}

impl Default for Executor<SystemForker> {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

impl<F: Forker> Executor<F> {
    /// Swap the process-creation backend.
    pub fn with_forker<G: Forker>(self, forker: G) -> Executor<G> {
        Executor {
            config: self.config,
            env: self.env,
            audit: self.audit,
            forker,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Run `command` with the caller's credentials.
    pub fn run_trusted(&self, command: &str) -> Result<ExecResult> {
        self.system_core(&ExecRequest::trusted(command))
    }

    /// Run `command` as `uid`/`gid`. Zero leaves that id unchanged.
    pub fn run_as(&self, command: &str, uid: u32, gid: u32) -> Result<ExecResult> {
        self.system_core(&ExecRequest::unprivileged(command, uid, gid))
    }

    /// Fork, drop to the requested credentials, exec `shell -c command` with
    /// the trusted environment and wait for it.
    ///
    /// Returns only after the child has been reaped. When auditing is on the
    /// child's output is captured and a record is appended to the audit log.
    pub fn system_core(&self, request: &ExecRequest) -> Result<ExecResult> {
        let prepared = PreparedExec::new(&self.config, &self.env, request)?;

        let pipes = if self.audit.is_enabled() {
            match CapturePipes::open() {
                Ok(pipes) => Some(pipes),
                Err(e) => {
                    log::warn!("Failed to create capture pipes: {}; running without audit", e);
                    None
                }
            }
        } else {
            None
        };
        let child_ends = pipes.as_ref().map(CapturePipes::child_ends);

        // SAFETY: the child branch only runs `run_child`, which uses
        // async-signal-safe calls on data prepared before the fork.
        match unsafe { self.forker.fork() } {
            ForkOutcome::Failed(errno) => {
                drop(pipes);
                log::error!("fork failed for '{}': {}", request.command, errno);
                Err(ExecError::Fork(errno))
            }
            ForkOutcome::Child => run_child(&prepared, child_ends.as_ref()),
            ForkOutcome::Parent(pid) => self.supervise(request, pid, pipes),
        }
    }

    fn supervise(&self, request: &ExecRequest, pid: Pid, pipes: Option<CapturePipes>) -> Result<ExecResult> {
        log::debug!(
            "{}: spawned child {} for '{}' (target {})",
            request.caller_tag,
            pid,
            request.command,
            describe_target(request.target)
        );

        let (capture, reaped) = match pipes {
            Some(pipes) => {
                let outcome = capture::collect(
                    pipes.into_read_ends(),
                    pid,
                    self.config.capture_capacity,
                    self.config.poll_interval_ms,
                );
                (Some(outcome.output), outcome.reaped)
            }
            None => (None, None),
        };

        let raw_wait_status = match reaped {
            Some(status) => status,
            None => reap(pid)?,
        };
        let result = ExecResult {
            pid,
            raw_wait_status,
            capture,
        };

        match (result.exit_code(), result.signal()) {
            (Some(code), _) => log::debug!("child {} exited with {}", pid, code),
            (None, Some(sig)) => log::debug!("child {} killed by {:?}", pid, sig),
            _ => log::debug!("child {} ended with status {:#x}", pid, raw_wait_status),
        }

        if let Some(output) = &result.capture {
            let record = AuditRecord::new(
                &request.caller_tag,
                &request.command,
                &output.stdout,
                &output.stderr,
                result.audit_exit_code(),
            );
            self.audit.record(&record);
        }

        Ok(result)
    }
}

/// Blocking wait for `pid`, retrying on EINTR.
fn reap(pid: Pid) -> Result<i32> {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: waitpid writes only into `status`.
        let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
        if ret >= 0 {
            return Ok(status);
        }
        match Errno::last() {
            Errno::EINTR => continue,
            errno => {
                log::error!("waitpid({}) failed: {}", pid, errno);
                return Err(ExecError::Wait(errno));
            }
        }
    }
}

fn describe_target(target: CredentialTarget) -> String {
    let id = |v: Option<u32>| v.map_or_else(|| "unchanged".to_string(), |v| v.to_string());
    format!("uid={} gid={}", id(target.uid), id(target.gid))
}

/// Run a request with the default configuration.
pub fn system_core(request: &ExecRequest) -> Result<ExecResult> {
    Executor::default().system_core(request)
}

/// Run `command` with the caller's credentials and the default configuration.
pub fn run_trusted(command: &str) -> Result<ExecResult> {
    Executor::default().run_trusted(command)
}

/// Run `command` as `uid`/`gid` with the default configuration.
pub fn run_as(command: &str, uid: u32, gid: u32) -> Result<ExecResult> {
    Executor::default().run_as(command, uid, gid)
}
