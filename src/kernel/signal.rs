//! Signal disposition hardening for setuid entry points
//!
//! Every signal an unprivileged invoker could use to interrupt privileged code
//! is set to SIG_IGN. SIGKILL and SIGSTOP cannot be changed by anyone;
//! SIGCHLD stays default so children can be reaped.

use crate::config::types::{ExecError, Result};
use log::debug;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Signals that are never ignored.
pub const RESERVED_SIGNALS: [Signal; 3] = [Signal::SIGKILL, Signal::SIGSTOP, Signal::SIGCHLD];

/// Standard signals set to SIG_IGN.
pub const IGNORED_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGUSR1,
    Signal::SIGSEGV,
    Signal::SIGUSR2,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGCONT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGURG,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGVTALRM,
    Signal::SIGPROF,
    Signal::SIGWINCH,
    Signal::SIGIO,
    Signal::SIGPWR,
    Signal::SIGSYS,
];

#[cfg(all(
    target_os = "linux",
    not(any(target_arch = "mips", target_arch = "mips64", target_arch = "sparc64"))
))]
const ARCH_IGNORED_SIGNALS: &[Signal] = &[Signal::SIGSTKFLT];

#[cfg(not(all(
    target_os = "linux",
    not(any(target_arch = "mips", target_arch = "mips64", target_arch = "sparc64"))
)))]
const ARCH_IGNORED_SIGNALS: &[Signal] = &[];

/// Set every catchable signal except SIGCHLD to SIG_IGN, real-time range included.
pub fn ignore_all_signals() -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());

    for sig in IGNORED_SIGNALS.iter().chain(ARCH_IGNORED_SIGNALS) {
        // SAFETY: installing SIG_IGN runs no user code in signal context.
        unsafe { signal::sigaction(*sig, &ignore) }
            .map_err(|e| ExecError::Signal(format!("Failed to ignore {}: {}", sig, e)))?;
    }

    for signo in realtime_signals() {
        // SAFETY: SIG_IGN for a real-time signal number in [SIGRTMIN, SIGRTMAX].
        let previous = unsafe { libc::signal(signo, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(ExecError::Signal(format!(
                "Failed to ignore real-time signal {}: {}",
                signo,
                std::io::Error::last_os_error()
            )));
        }
    }

    debug!(
        "Ignoring {} standard and {} real-time signals",
        IGNORED_SIGNALS.len() + ARCH_IGNORED_SIGNALS.len(),
        realtime_signals().count()
    );
    Ok(())
}

#[cfg(target_os = "linux")]
fn realtime_signals() -> std::ops::RangeInclusive<libc::c_int> {
    #[allow(unused_unsafe)]
    // SAFETY: plain getters for the libc-reserved real-time bounds.
    let (min, max) = unsafe { (libc::SIGRTMIN(), libc::SIGRTMAX()) };
    min..=max
}

#[cfg(not(target_os = "linux"))]
fn realtime_signals() -> std::ops::RangeInclusive<libc::c_int> {
    #[allow(clippy::reversed_empty_ranges)]
    {
        1..=0
    }
}

/// Whether `sig` is currently set to SIG_IGN.
pub fn is_ignored(sig: Signal) -> Result<bool> {
    // SAFETY: a null `act` only queries the current disposition.
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sigaction(sig as libc::c_int, std::ptr::null(), &mut current) };
    if rc != 0 {
        return Err(ExecError::Signal(format!(
            "Failed to query {}: {}",
            sig,
            std::io::Error::last_os_error()
        )));
    }
    Ok(current.sa_sigaction == libc::SIG_IGN)
}
