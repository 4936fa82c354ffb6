//! Resource limits used by the privilege initializer.

use crate::config::types::{ExecError, Result};
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::os::unix::io::RawFd;

/// Descriptor-table size assumed when RLIMIT_NOFILE cannot be read.
pub const FALLBACK_OPEN_MAX: RawFd = 256;

/// Upper bound for an unlimited RLIMIT_NOFILE (kernel default for fs.nr_open).
const NR_OPEN_CEILING: RawFd = 1 << 20;

/// Size of the descriptor table (soft RLIMIT_NOFILE).
pub fn descriptor_table_size() -> RawFd {
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _)) if soft == libc::RLIM_INFINITY => NR_OPEN_CEILING,
        Ok((soft, _)) => RawFd::try_from(soft).unwrap_or(NR_OPEN_CEILING).min(NR_OPEN_CEILING),
        Err(e) => {
            log::warn!("getrlimit(RLIMIT_NOFILE) failed, assuming {}: {}", FALLBACK_OPEN_MAX, e);
            FALLBACK_OPEN_MAX
        }
    }
}

/// Set RLIMIT_CORE to zero (soft and hard) so a crash cannot dump secrets.
pub fn disable_core_dumps() -> Result<()> {
    setrlimit(Resource::RLIMIT_CORE, 0, 0)
        .map_err(|e| ExecError::Privilege(format!("Couldn't disable core dumps: {}", e)))?;
    log::debug!("Core dumps disabled");
    Ok(())
}

/// Current (soft, hard) core-dump limit.
pub fn core_dump_limit() -> Result<(u64, u64)> {
    let (soft, hard) = getrlimit(Resource::RLIMIT_CORE)
        .map_err(|e| ExecError::Privilege(format!("getrlimit(RLIMIT_CORE) failed: {}", e)))?;
    Ok((soft as u64, hard as u64))
}
