//! Configuration & shared types
//!
//! [`ExecConfig`] is built once (defaults or a JSON file) and handed to the
//! executor by value. The trusted environment is deliberately not part of it.

pub mod settings;
pub mod types;

use self::types::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_SETTINGS_PATH: &str = "/var/ipcop/main/settings";
pub const DEFAULT_AUDIT_LOG_PATH: &str = "/var/log/ipcop/debug.log";
pub const DEFAULT_AUDIT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_CAPTURE_CAPACITY: usize = 4096;
pub const DEFAULT_POLL_INTERVAL_MS: u16 = 1000;

/// Settings key that turns command auditing on.
pub const AUDIT_TOGGLE_KEY: &str = "DEBUG_SYSTEM_CALLS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Interpreter used as `<shell> -c <command>`
    pub shell: PathBuf,
    /// Settings store holding the audit toggle
    pub settings_path: PathBuf,
    /// Append-only audit log
    pub audit_log_path: PathBuf,
    /// Rotate the audit log once it grows beyond this many bytes
    pub audit_max_bytes: u64,
    /// Bytes kept per captured stream
    pub capture_capacity: usize,
    /// Readiness-wait timeout per capture loop iteration
    pub poll_interval_ms: u16,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            audit_log_path: PathBuf::from(DEFAULT_AUDIT_LOG_PATH),
            audit_max_bytes: DEFAULT_AUDIT_MAX_BYTES,
            capture_capacity: DEFAULT_CAPTURE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ExecConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: ExecConfig = serde_json::from_str(&content)
            .map_err(|e| ExecError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        log::debug!("Loaded exec config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.shell.is_absolute() {
            return Err(ExecError::Config(format!(
                "shell must be an absolute path: {}",
                self.shell.display()
            )));
        }
        if self.capture_capacity == 0 {
            return Err(ExecError::Config("capture_capacity must be non-zero".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ExecError::Config("poll_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_appliance_layout() {
        let config = ExecConfig::default();
        assert_eq!(config.shell, PathBuf::from("/bin/sh"));
        assert_eq!(config.audit_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.capture_capacity, 4096);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privexec.json");
        std::fs::write(&path, r#"{ "audit_log_path": "/tmp/x.log", "capture_capacity": 16 }"#).unwrap();

        let config = ExecConfig::load_from_file(&path).unwrap();
        assert_eq!(config.audit_log_path, PathBuf::from("/tmp/x.log"));
        assert_eq!(config.capture_capacity, 16);
        assert_eq!(config.shell, PathBuf::from(DEFAULT_SHELL));
    }

    #[test]
    fn load_rejects_relative_shell() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privexec.json");
        std::fs::write(&path, r#"{ "shell": "sh" }"#).unwrap();
        assert!(matches!(ExecConfig::load_from_file(&path), Err(ExecError::Config(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ExecConfig::load_from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let config = ExecConfig {
            capture_capacity: 0,
            ..ExecConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
