//! Startup hardening for setuid-root entry points.
//!
//! Call [`initialize_privilege`] as the very first thing in `main`. A failure
//! leaves the process in an unknown state: exit(1) without doing anything else.

use crate::config::types::Result;
use crate::kernel::{credentials, rlimit, signal};
use crate::utils::fd_closure;

/// Bring a setuid-root process to a known state.
///
/// Order is fixed: signals, descriptor closure, stdio repair, core dumps,
/// credentials. The first failing step aborts the sequence.
pub fn harden_process() -> Result<()> {
    signal::ignore_all_signals()?;
    fd_closure::close_inherited_fds()?;
    fd_closure::ensure_stdio_open()?;
    rlimit::disable_core_dumps()?;
    credentials::reset_to_root()?;
    log::debug!("Privilege initialization complete");
    Ok(())
}

/// Boolean form of [`harden_process`]; `false` means exit(1) immediately.
pub fn initialize_privilege() -> bool {
    match harden_process() {
        Ok(()) => true,
        Err(e) => {
            eprintln!("{}", e);
            false
        }
    }
}
