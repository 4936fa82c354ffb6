//! Reader for the appliance's line-oriented `KEY=VALUE` settings files.
//!
//! Files are re-read on every lookup; nothing is cached across calls.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Split one settings line into key and value. Blank and `#` lines yield `None`.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Scan `path` for `key`, stopping at the first match.
///
/// Lines are read as bytes; a line that is not valid UTF-8 is decoded lossily
/// and cannot hide the keys that follow it.
pub fn lookup(path: &Path, key: &str) -> io::Result<Option<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some((k, v)) = parse_line(&line) {
            if k == key {
                return Ok(Some(v.to_string()));
            }
        }
    }
}

/// True when `key` is present with value `on`. A missing file reads as off.
pub fn is_on(path: &Path, key: &str) -> bool {
    match lookup(path, key) {
        Ok(value) => value.as_deref() == Some("on"),
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                log::debug!("Cannot read settings {}: {}", path.display(), e);
            }
            false
        }
    }
}
