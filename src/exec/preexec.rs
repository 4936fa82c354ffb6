//! Pre-Exec Ordering Enforcement
//!
//! The child-side sequence is FIXED:
//! 1. redirect stdout/stderr into the capture pipes (when capturing)
//! 2. close every pipe descriptor not needed after redirection
//! 3. supplementary groups, then gid, then uid, then verify
//! 4. execve(shell, ["sh", "-c", command], trusted environment)
//!
//! Any failure writes a diagnostic to stderr and exits 127. Nothing here may
//! allocate or log: everything the child touches is built by
//! [`PreparedExec::new`] before fork.

use crate::config::types::{CredentialTarget, ExecError, ExecRequest, Result, CHILD_FAILURE_EXIT};
use crate::config::ExecConfig;
use crate::kernel::credentials::drop_to_target;
use crate::utils::env_hygiene::TrustedEnvironment;
use nix::errno::Errno;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;

/// `argv[0]` for the interpreter.
const SHELL_ARGV0: &str = "sh";

/// Everything the child needs, allocated in the parent.
pub struct PreparedExec {
    shell: CString,
    _argv: [CString; 3],
    _envp: Vec<CString>,
    argv_ptrs: [*const c_char; 4],
    envp_ptrs: Vec<*const c_char>,
    tag: Vec<u8>,
    target: CredentialTarget,
}

impl PreparedExec {
    /// Build argv/envp for `shell -c command`. A command with an interior NUL
    /// cannot be passed to exec and is rejected.
    pub fn new(config: &ExecConfig, env: &TrustedEnvironment, request: &ExecRequest) -> Result<Self> {
        let command = CString::new(request.command.as_str())
            .map_err(|_| ExecError::InvalidCommand("command contains NUL byte".to_string()))?;
        let shell = CString::new(config.shell.as_os_str().as_bytes())
            .map_err(|_| ExecError::Config("shell path contains NUL byte".to_string()))?;
        let argv0 = CString::new(SHELL_ARGV0)
            .map_err(|_| ExecError::Config("invalid argv[0]".to_string()))?;
        let dash_c = CString::new("-c").map_err(|_| ExecError::Config("invalid argv[1]".to_string()))?;

        let argv = [argv0, dash_c, command];
        let envp = env.to_envp()?;

        // Pointers into the CStrings' heap buffers stay valid when `Self` moves.
        let argv_ptrs = [argv[0].as_ptr(), argv[1].as_ptr(), argv[2].as_ptr(), std::ptr::null()];
        let envp_ptrs = envp
            .iter()
            .map(|entry| entry.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            shell,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
            tag: request.caller_tag.as_bytes().to_vec(),
            target: request.target,
        })
    }

    pub fn shell(&self) -> &CStr {
        &self.shell
    }

    pub fn target(&self) -> CredentialTarget {
        self.target
    }
}

/// Child-side descriptors of the capture pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPipeEnds {
    pub stdout_write: RawFd,
    pub stderr_write: RawFd,
    pub read_ends: [RawFd; 2],
}

/// Type-state marker: freshly forked child
pub struct Fresh;

/// Type-state marker: stdout/stderr point where they should
pub struct Redirected;

/// Type-state marker: credentials are final
pub struct CredsDropped;

/// Forked child with type-state tracking. Only `ChildImage<CredsDropped>` can exec.
pub struct ChildImage<'a, S> {
    prepared: &'a PreparedExec,
    _state: PhantomData<S>,
}

impl<'a, S> ChildImage<'a, S> {
    fn advance<T>(self) -> ChildImage<'a, T> {
        ChildImage {
            prepared: self.prepared,
            _state: PhantomData,
        }
    }

    /// Write `<tag>: <what>: <reason>` to stderr and exit 127.
    fn abort(&self, what: &str, errno: Errno) -> ! {
        write_stderr(&self.prepared.tag);
        write_stderr(b": ");
        write_stderr(what.as_bytes());
        write_stderr(b": ");
        write_stderr(errno.desc().as_bytes());
        write_stderr(b"\n");
        // SAFETY: _exit skips atexit handlers and stdio flushing that belong to the parent.
        unsafe { libc::_exit(CHILD_FAILURE_EXIT) }
    }
}

impl<'a> ChildImage<'a, Fresh> {
    pub fn new(prepared: &'a PreparedExec) -> Self {
        Self {
            prepared,
            _state: PhantomData,
        }
    }

    /// Point stdout/stderr at the pipe write ends and close the rest.
    pub fn redirect_output(self, pipes: Option<&ChildPipeEnds>) -> ChildImage<'a, Redirected> {
        if let Some(ends) = pipes {
            for fd in ends.read_ends {
                raw_close(fd);
            }
            // The stderr pipe may occupy fd 1 when stdout was closed at pipe time;
            // move it clear before stdout is overwritten.
            let stderr_write = if ends.stderr_write == libc::STDOUT_FILENO {
                match move_above_stdio(ends.stderr_write) {
                    Ok(fd) => fd,
                    Err(errno) => self.abort("Couldn't redirect stderr", errno),
                }
            } else {
                ends.stderr_write
            };
            if let Err(errno) = redirect(ends.stdout_write, libc::STDOUT_FILENO) {
                self.abort("Couldn't redirect stdout", errno);
            }
            if let Err(errno) = redirect(stderr_write, libc::STDERR_FILENO) {
                self.abort("Couldn't redirect stderr", errno);
            }
            for fd in [ends.stdout_write, stderr_write] {
                if fd != libc::STDOUT_FILENO && fd != libc::STDERR_FILENO {
                    raw_close(fd);
                }
            }
        }
        self.advance()
    }
}

impl<'a> ChildImage<'a, Redirected> {
    /// setgroups/setresgid/setresuid as requested; never falls through on failure.
    pub fn drop_credentials(self) -> ChildImage<'a, CredsDropped> {
        if let Err(failure) = drop_to_target(self.prepared.target) {
            self.abort(failure.stage.message(), failure.errno);
        }
        self.advance()
    }
}

impl<'a> ChildImage<'a, CredsDropped> {
    /// Replace the process image. Only returns by exiting 127.
    pub fn exec(self) -> ! {
        let prepared = self.prepared;
        // SAFETY: both arrays are NUL-terminated and point into CStrings owned by `prepared`.
        unsafe {
            libc::execve(
                prepared.shell.as_ptr(),
                prepared.argv_ptrs.as_ptr(),
                prepared.envp_ptrs.as_ptr(),
            );
        }
        self.abort("execve failed", Errno::last())
    }
}

/// Full child procedure: redirect, drop credentials, exec.
pub fn run_child(prepared: &PreparedExec, pipes: Option<&ChildPipeEnds>) -> ! {
    ChildImage::new(prepared)
        .redirect_output(pipes)
        .drop_credentials()
        .exec()
}

/// dup2 `from` onto `to`; if they are already the same slot, clear close-on-exec instead.
fn redirect(from: RawFd, to: RawFd) -> std::result::Result<(), Errno> {
    // SAFETY: fcntl/dup2 on descriptors owned by this process.
    let rc = unsafe {
        if from == to {
            libc::fcntl(to, libc::F_SETFD, 0)
        } else {
            libc::dup2(from, to)
        }
    };
    if rc == -1 {
        Err(Errno::last())
    } else {
        Ok(())
    }
}

/// Duplicate `fd` onto the lowest free slot above stdio, close-on-exec.
fn move_above_stdio(fd: RawFd) -> std::result::Result<RawFd, Errno> {
    // SAFETY: F_DUPFD_CLOEXEC on a descriptor owned by this process.
    let moved = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1) };
    if moved == -1 {
        Err(Errno::last())
    } else {
        Ok(moved)
    }
}

fn raw_close(fd: RawFd) {
    // SAFETY: closing a descriptor the child no longer needs.
    unsafe {
        libc::close(fd);
    }
}

fn write_stderr(bytes: &[u8]) {
    // SAFETY: write(2) is async-signal-safe; a short or failed write is not recoverable here.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(command: &str) -> Result<PreparedExec> {
        PreparedExec::new(
            &ExecConfig::default(),
            &TrustedEnvironment::standard(),
            &ExecRequest::trusted(command),
        )
    }

    #[test]
    fn empty_command_is_passed_to_the_shell() {
        let prepared = prepare("").unwrap();
        assert_eq!(prepared._argv[2].to_bytes(), b"");
    }

    #[test]
    fn rejects_interior_nul() {
        assert!(matches!(prepare("echo a\0b"), Err(ExecError::InvalidCommand(_))));
    }

    #[test]
    fn argv_is_sh_dash_c_command() {
        let prepared = prepare("echo hi; exit 3").unwrap();
        assert_eq!(prepared.shell().to_str().unwrap(), "/bin/sh");
        let argv: Vec<&str> = prepared._argv.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(argv, vec!["sh", "-c", "echo hi; exit 3"]);
        assert!(prepared.argv_ptrs[3].is_null());
    }

    #[test]
    fn envp_is_trusted_table_only() {
        std::env::set_var("PRIVEXEC_PREEXEC_MARKER", "1");
        let prepared = prepare("true").unwrap();
        let envp: Vec<&str> = prepared._envp.iter().map(|e| e.to_str().unwrap()).collect();
        assert_eq!(envp, vec!["PATH=/usr/bin:/usr/sbin:/sbin:/bin", "SHELL=/bin/sh", "TERM=dumb"]);
        assert_eq!(prepared.envp_ptrs.len(), 4);
        assert!(prepared.envp_ptrs[3].is_null());
        std::env::remove_var("PRIVEXEC_PREEXEC_MARKER");
    }

    #[test]
    fn carries_credential_target() {
        let prepared = PreparedExec::new(
            &ExecConfig::default(),
            &TrustedEnvironment::standard(),
            &ExecRequest::unprivileged("id", 65534, 65534),
        )
        .unwrap();
        assert_eq!(
            prepared.target(),
            CredentialTarget {
                uid: Some(65534),
                gid: Some(65534)
            }
        );
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [-1 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        (fds[0], fds[1])
    }

    fn read_all(fd: RawFd) -> Vec<u8> {
        use std::io::Read;
        use std::os::unix::io::FromRawFd;
        let mut out = Vec::new();
        let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn stderr_pipe_on_fd1_keeps_streams_apart() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        let prepared = prepare("true").unwrap();
        let (out_read, out_write) = pipe();
        let (err_read, err_write) = pipe();

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                // stdout was closed when the pipes were made: the stderr write end sits on fd 1.
                unsafe { libc::dup2(err_write, libc::STDOUT_FILENO) };
                raw_close(err_write);
                let ends = ChildPipeEnds {
                    stdout_write: out_write,
                    stderr_write: libc::STDOUT_FILENO,
                    read_ends: [out_read, err_read],
                };
                let _redirected = ChildImage::new(&prepared).redirect_output(Some(&ends));
                unsafe {
                    libc::write(libc::STDOUT_FILENO, b"out".as_ptr().cast(), 3);
                    libc::write(libc::STDERR_FILENO, b"err".as_ptr().cast(), 3);
                    libc::_exit(0)
                }
            }
            ForkResult::Parent { child } => {
                raw_close(out_write);
                raw_close(err_write);
                let stdout = read_all(out_read);
                let stderr = read_all(err_read);
                assert!(matches!(waitpid(child, None).unwrap(), WaitStatus::Exited(_, 0)));
                assert_eq!(stdout, b"out");
                assert_eq!(stderr, b"err");
            }
        }
    }
}
