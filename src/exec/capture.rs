//! Stdout/stderr capture for audited commands.
//!
//! Two close-on-exec pipes are opened before fork. The parent multiplexes the
//! read ends with `poll()` until both report EOF or the child is found dead on
//! an idle tick. Data beyond the buffer capacity is read and discarded so a
//! chatty child never blocks on a full pipe.

use crate::config::types::CapturedOutput;
use crate::exec::preexec::ChildPipeEnds;
use crate::utils::output::CaptureBuffer;
use log::{debug, warn};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const READ_CHUNK: usize = 4096;

/// Upper bound on read passes once the child has been reaped. A backgrounded
/// grandchild holding the pipe open must not keep the parent here forever.
const MAX_DRAIN_PASSES: usize = 64;

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn open() -> io::Result<Self> {
        let mut fds = [-1 as RawFd; 2];
        // SAFETY: pipe2 fills both slots on success.
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both descriptors were just created and are owned by nobody else.
        unsafe {
            Ok(Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }
}

/// The stdout and stderr pipes of one audited execution.
pub struct CapturePipes {
    stdout: Pipe,
    stderr: Pipe,
}

impl CapturePipes {
    /// Open both pipes. On failure nothing stays open.
    pub fn open() -> io::Result<Self> {
        let stdout = Pipe::open()?;
        let stderr = Pipe::open()?;
        Ok(Self { stdout, stderr })
    }

    /// Raw descriptors the child redirects and closes.
    pub fn child_ends(&self) -> ChildPipeEnds {
        ChildPipeEnds {
            stdout_write: self.stdout.write.as_raw_fd(),
            stderr_write: self.stderr.write.as_raw_fd(),
            read_ends: [self.stdout.read.as_raw_fd(), self.stderr.read.as_raw_fd()],
        }
    }

    /// Drop the write ends and return the (stdout, stderr) read ends.
    pub fn into_read_ends(self) -> (OwnedFd, OwnedFd) {
        let CapturePipes { stdout, stderr } = self;
        drop(stdout.write);
        drop(stderr.write);
        (stdout.read, stderr.read)
    }
}

/// What the capture loop observed.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub output: CapturedOutput,
    /// Raw wait status if the child was reaped during an idle tick.
    pub reaped: Option<i32>,
}

struct Stream {
    fd: OwnedFd,
    buf: CaptureBuffer,
    open: bool,
}

impl Stream {
    fn new(fd: OwnedFd, capacity: usize) -> Self {
        if let Err(e) = set_nonblocking(fd.as_raw_fd()) {
            debug!("Failed to set O_NONBLOCK on capture pipe: {}", e);
        }
        Self {
            fd,
            buf: CaptureBuffer::with_capacity(capacity),
            open: true,
        }
    }

    /// One read; returns whether bytes arrived.
    fn read_once(&mut self, scratch: &mut [u8]) -> bool {
        match read_fd(self.fd.as_raw_fd(), scratch) {
            Ok(0) => {
                self.open = false;
                false
            }
            Ok(n) => {
                self.buf.push(&scratch[..n]);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                debug!("Capture pipe read failed: {}", e);
                self.open = false;
                false
            }
        }
    }
}

/// Collect the child's output until both streams close, or until an idle
/// tick finds the child already exited.
pub fn collect(
    read_ends: (OwnedFd, OwnedFd),
    child: Pid,
    capacity: usize,
    poll_interval_ms: u16,
) -> CaptureOutcome {
    let mut streams = [Stream::new(read_ends.0, capacity), Stream::new(read_ends.1, capacity)];
    let mut scratch = [0u8; READ_CHUNK];
    let mut reaped = None;

    while streams.iter().any(|s| s.open) {
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(2);
        let mut slots: Vec<usize> = Vec::with_capacity(2);
        for (idx, stream) in streams.iter().enumerate().filter(|(_, s)| s.open) {
            fds.push(libc::pollfd {
                fd: stream.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            slots.push(idx);
        }

        // SAFETY: `fds` is a live array of `fds.len()` pollfd entries.
        let ret = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                libc::c_int::from(poll_interval_ms),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            warn!("poll on capture pipes failed: {}; output capture incomplete", errno);
            break;
        }

        if ret == 0 {
            if let Some(status) = try_reap(child) {
                debug!("Child {} exited while pipes were still open", child);
                reaped = Some(status);
                drain_available(&mut streams, &mut scratch);
                break;
            }
            continue;
        }

        for (pfd, idx) in fds.iter().zip(slots) {
            if pfd.revents == 0 {
                continue;
            }
            let stream = &mut streams[idx];
            if pfd.revents & libc::POLLNVAL != 0 {
                stream.open = false;
                continue;
            }
            stream.read_once(&mut scratch);
        }
    }

    let [stdout, stderr] = streams;
    if stdout.buf.is_truncated() || stderr.buf.is_truncated() {
        debug!("Captured output of child {} truncated to {} bytes per stream", child, capacity);
    }
    CaptureOutcome {
        output: CapturedOutput {
            stdout: stdout.buf,
            stderr: stderr.buf,
        },
        reaped,
    }
}

/// Read whatever is immediately available on the still-open streams.
fn drain_available(streams: &mut [Stream; 2], scratch: &mut [u8]) {
    for stream in streams.iter_mut() {
        let mut passes = 0;
        while stream.open && passes < MAX_DRAIN_PASSES {
            if !stream.read_once(scratch) {
                break;
            }
            passes += 1;
        }
    }
}

/// Non-blocking reap. `None` means still running or not reapable right now.
fn try_reap(child: Pid) -> Option<i32> {
    let mut status: libc::c_int = 0;
    // SAFETY: waitpid writes only into `status`.
    let ret = unsafe { libc::waitpid(child.as_raw(), &mut status, libc::WNOHANG) };
    if ret == child.as_raw() {
        Some(status)
    } else {
        None
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL on a descriptor this process owns.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes.
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}
