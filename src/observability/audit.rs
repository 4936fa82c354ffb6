//! Command audit trail
//!
//! When the settings store has `DEBUG_SYSTEM_CALLS=on`, every executed command
//! is appended to a text log together with its captured output and exit code.
//! Auditing is best-effort: no failure here ever reaches the caller.

use crate::config::settings;
use crate::config::{ExecConfig, AUDIT_TOGGLE_KEY};
use crate::kernel::credentials::current_ids;
use crate::utils::output::CaptureBuffer;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const BACKUP_SUFFIX: &str = ".old";
const LOG_FILE_MODE: u32 = 0o600;

/// One executed command, as written to the audit log.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub timestamp: DateTime<Local>,
    pub program_tag: &'a str,
    pub pid: u32,
    pub real_uid: u32,
    pub effective_uid: u32,
    pub command: &'a str,
    pub stdout: &'a CaptureBuffer,
    pub stderr: &'a CaptureBuffer,
    pub exit_code: i32,
}

impl<'a> AuditRecord<'a> {
    /// Stamp a record with the current time and this process's identity.
    pub fn new(
        program_tag: &'a str,
        command: &'a str,
        stdout: &'a CaptureBuffer,
        stderr: &'a CaptureBuffer,
        exit_code: i32,
    ) -> Self {
        let ids = current_ids();
        Self {
            timestamp: Local::now(),
            program_tag,
            pid: std::process::id(),
            real_uid: ids.uid,
            effective_uid: ids.euid,
            command,
            stdout,
            stderr,
            exit_code,
        }
    }

    /// Render the full text block, terminated by a blank line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "[{}] {}[{}] UID={} EUID={}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.program_tag,
            self.pid,
            self.real_uid,
            self.effective_uid
        );
        let _ = writeln!(out, "  CMD: {}", self.command);
        render_stream(&mut out, "STDOUT", self.stdout);
        render_stream(&mut out, "STDERR", self.stderr);
        let _ = writeln!(out, "  EXIT: {}", self.exit_code);
        out.push('\n');
        out
    }
}

fn render_stream(out: &mut String, label: &str, buf: &CaptureBuffer) {
    if buf.is_empty() {
        let _ = writeln!(out, "  {}: (empty)", label);
        return;
    }
    let _ = writeln!(out, "  {}:", label);
    for line in buf.lines() {
        let _ = writeln!(out, "    {}", String::from_utf8_lossy(line));
    }
}

/// Audit log location, rotation threshold and the settings file holding the toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLog {
    settings_path: PathBuf,
    log_path: PathBuf,
    max_bytes: u64,
}

impl AuditLog {
    pub fn new(settings_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            settings_path: settings_path.into(),
            log_path: log_path.into(),
            max_bytes,
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(
            config.settings_path.clone(),
            config.audit_log_path.clone(),
            config.audit_max_bytes,
        )
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// `<log>.old`, the single retained generation.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = OsString::from(self.log_path.as_os_str());
        name.push(BACKUP_SUFFIX);
        PathBuf::from(name)
    }

    /// Re-read the settings store. Missing store or key means disabled.
    pub fn is_enabled(&self) -> bool {
        settings::is_on(&self.settings_path, AUDIT_TOGGLE_KEY)
    }

    /// Move an oversized log to `<log>.old`, replacing any older backup.
    /// Returns whether a rotation happened.
    pub fn rotate_if_oversized(&self) -> bool {
        let size = match fs::metadata(&self.log_path) {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if size <= self.max_bytes {
            return false;
        }

        let backup = self.backup_path();
        match fs::rename(&self.log_path, &backup) {
            Ok(()) => {
                info!(
                    "Rotated audit log {} ({} bytes) to {}",
                    self.log_path.display(),
                    size,
                    backup.display()
                );
                true
            }
            Err(e) => {
                warn!("Failed to rotate audit log {}: {}", self.log_path.display(), e);
                false
            }
        }
    }

    /// Append `record` if auditing is enabled. Never fails the caller.
    pub fn record(&self, record: &AuditRecord<'_>) {
        if !self.is_enabled() {
            return;
        }

        self.rotate_if_oversized();

        if let Err(e) = self.append(&record.render()) {
            warn!("Failed to write audit log {}: {}", self.log_path.display(), e);
        }
    }

    /// Single write on an O_APPEND handle, flushed and closed before returning.
    fn append(&self, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&self.log_path)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        debug!("Appended {} bytes to {}", text.len(), self.log_path.display());
        Ok(())
    }
}
