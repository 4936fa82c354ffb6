//! File descriptor hygiene for setuid entry points
//!
//! - Close everything from 3 upwards (close_range, bounded loop fallback)
//! - Make sure 0, 1 and 2 are open so a later open() cannot land on them

use crate::config::types::{ExecError, Result};
use crate::kernel::rlimit::descriptor_table_size;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::close;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::Path;

/// First descriptor number that is not stdio.
pub const FIRST_NON_STDIO_FD: RawFd = 3;

const NULL_DEVICE: &str = "/dev/null";

/// Close all file descriptors except stdin, stdout, stderr.
pub fn close_inherited_fds() -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if try_close_range() {
            log::debug!("Closed inherited FDs using close_range");
            return Ok(());
        }
    }

    let limit = descriptor_table_size();
    let closed = close_fds_up_to(limit);
    log::debug!("Closed {} inherited FDs below {}", closed, limit);
    Ok(())
}

#[cfg(target_os = "linux")]
fn try_close_range() -> bool {
    use std::os::raw::c_int;

    // SAFETY: close_range only closes descriptors; the range excludes stdio.
    let result = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            FIRST_NON_STDIO_FD as c_int,
            !0 as c_int, // Max FD
            0 as c_int,
        )
    };

    result == 0
}

/// Close every descriptor in `3..limit`, ignoring ones that are not open.
fn close_fds_up_to(limit: RawFd) -> usize {
    (FIRST_NON_STDIO_FD..limit)
        .filter(|fd| close(*fd).is_ok())
        .count()
}

/// Ensure 0, 1 and 2 refer to open files, reopening `/dev/null` where needed.
pub fn ensure_stdio_open() -> Result<()> {
    for fd in 0..FIRST_NON_STDIO_FD {
        match fstat(fd) {
            Ok(_) => {}
            Err(Errno::EBADF) => reopen_null_on(fd)?,
            Err(e) => {
                return Err(ExecError::Filesystem(format!("fstat({}) failed: {}", fd, e)));
            }
        }
    }
    Ok(())
}

fn reopen_null_on(fd: RawFd) -> Result<()> {
    let opened = open(Path::new(NULL_DEVICE), OFlag::O_RDWR, Mode::empty()).map_err(|e| {
        ExecError::Filesystem(format!("Cannot open {} for fd {}: {}", NULL_DEVICE, fd, e))
    })?;

    // open() returns the lowest free slot; lower stdio slots are already valid.
    if opened != fd {
        let _ = close(opened);
        return Err(ExecError::Filesystem(format!(
            "{} landed on fd {} instead of {}",
            NULL_DEVICE, opened, fd
        )));
    }

    log::debug!("Reopened fd {} on {}", fd, NULL_DEVICE);
    Ok(())
}

/// Get list of open file descriptors
pub fn get_open_fds() -> Result<Vec<RawFd>> {
    let fd_dir = "/proc/self/fd";

    let entries = fs::read_dir(fd_dir)
        .map_err(|e| ExecError::Filesystem(format!("Failed to read {}: {}", fd_dir, e)))?;

    let mut fds: Vec<RawFd> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.parse::<RawFd>().ok())
        .collect();

    fds.sort();
    Ok(fds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_open_fds() {
        let fds = get_open_fds().unwrap();
        assert!(fds.len() >= 3);
        assert!(fds.contains(&0));
        assert!(fds.contains(&1));
        assert!(fds.contains(&2));
    }

    #[test]
    fn stdio_already_open_is_left_alone() {
        assert!(ensure_stdio_open().is_ok());
    }

    #[test]
    fn bounded_close_skips_stdio() {
        // An empty range must not touch anything.
        assert_eq!(close_fds_up_to(FIRST_NON_STDIO_FD), 0);
    }
}
