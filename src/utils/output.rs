/// Bounded output capture
///
/// A full buffer truncates; it never fails the command or stops the reader.
use std::fmt;

/// Fixed-capacity byte buffer for one captured stream.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    data: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

impl CaptureBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(64 * 1024)),
            capacity,
            truncated: false,
        }
    }

    /// Append as much of `chunk` as fits. Returns the number of bytes kept.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        let room = self.capacity - self.data.len();
        let kept = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..kept]);
        if kept < chunk.len() {
            self.truncated = true;
        }
        kept
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether bytes were dropped because the buffer was full.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Non-empty `\n`-separated lines, produced lazily without touching the buffer.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.data.split(|b| *b == b'\n').filter(|line| !line.is_empty())
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("data", &String::from_utf8_lossy(&self.data))
            .field("capacity", &self.capacity)
            .field("truncated", &self.truncated)
            .finish()
    }
}
