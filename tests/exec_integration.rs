//! Integration tests for the exec core
//!
//! Every test forks real `/bin/sh` children. Audit-dependent tests point the
//! settings store and audit log into a temporary directory.

use nix::sys::signal::Signal;
use nix::unistd::{getegid, geteuid, getgid, getuid};
use privexec::{ExecConfig, ExecError, ExecRequest, Executor};
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn config_in(dir: &TempDir, audit: bool) -> ExecConfig {
    let settings = dir.path().join("settings");
    let toggle = if audit { "on" } else { "off" };
    fs::write(&settings, format!("# test settings\nDEBUG_SYSTEM_CALLS={}\n", toggle)).unwrap();
    ExecConfig {
        settings_path: settings,
        audit_log_path: dir.path().join("debug.log"),
        poll_interval_ms: 100,
        ..ExecConfig::default()
    }
}

fn audited(dir: &TempDir) -> Executor {
    Executor::new(config_in(dir, true))
}

fn audit_text(dir: &TempDir) -> String {
    fs::read_to_string(dir.path().join("debug.log")).unwrap()
}

#[test]
fn test_exit_code_propagates() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));

    let result = exec.run_trusted("exit 3").unwrap();
    assert_eq!(result.exit_code(), Some(3));
    assert!(!result.success());

    let result = exec.run_trusted("true").unwrap();
    assert!(result.success());
}

#[test]
fn test_disabled_audit_captures_nothing() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));

    let result = exec.run_trusted("echo hello").unwrap();
    assert!(result.capture.is_none());
    assert!(!dir.path().join("debug.log").exists());
}

#[test]
fn test_audit_records_command_output_and_exit() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let result = exec.run_trusted("echo hello; exit 3").unwrap();
    assert_eq!(result.exit_code(), Some(3));
    let capture = result.capture.as_ref().expect("audited run captures output");
    assert_eq!(capture.stdout.as_bytes(), b"hello\n");

    let text = audit_text(&dir);
    assert!(text.contains("] safe_system["));
    assert!(text.contains("  CMD: echo hello; exit 3\n"));
    assert!(text.contains("  STDOUT:\n    hello\n"));
    assert!(text.contains("  STDERR: (empty)\n"));
    assert!(text.contains("  EXIT: 3\n"));
}

#[test]
fn test_signal_termination_is_reported() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let result = exec.run_trusted("kill -9 $$").unwrap();
    assert_eq!(result.exit_code(), None);
    assert_eq!(result.signal(), Some(Signal::SIGKILL));
    assert_eq!(result.audit_exit_code(), -1);
    assert!(audit_text(&dir).contains("  EXIT: -1\n"));
}

#[test]
fn test_environment_is_trusted_table_only() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);
    std::env::set_var("PRIVEXEC_LEAK_MARKER", "leaked");

    let result = exec.run_trusted("env").unwrap();
    assert!(result.success());
    let stdout = result.capture.unwrap().stdout.to_string_lossy();

    // The shell itself may add its own bookkeeping variables.
    let shell_added = ["PWD", "SHLVL", "_", "OLDPWD"];
    let mut seen = Vec::new();
    for line in stdout.lines() {
        let (key, value) = line.split_once('=').unwrap();
        match key {
            "PATH" => assert_eq!(value, "/usr/bin:/usr/sbin:/sbin:/bin"),
            "SHELL" => assert_eq!(value, "/bin/sh"),
            "TERM" => assert_eq!(value, "dumb"),
            other => assert!(shell_added.contains(&other), "unexpected variable {}", line),
        }
        seen.push(key.to_string());
    }
    for key in ["PATH", "SHELL", "TERM"] {
        assert!(seen.iter().any(|k| k == key), "{} missing from child environment", key);
    }
    std::env::remove_var("PRIVEXEC_LEAK_MARKER");
}

#[test]
fn test_output_overflow_is_truncated() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let result = exec
        .run_trusted("i=0; while [ $i -lt 2000 ]; do echo 0123456789abcdef; i=$((i+1)); done")
        .unwrap();
    assert!(result.success());
    let capture = result.capture.unwrap();
    assert_eq!(capture.stdout.len(), 4096);
    assert!(capture.stdout.is_truncated());
}

#[test]
fn test_slow_child_output_is_collected() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let result = exec.run_trusted("sleep 1; echo done").unwrap();
    assert!(result.success());
    assert_eq!(result.capture.unwrap().stdout.as_bytes(), b"done\n");
}

#[test]
fn test_backgrounded_grandchild_does_not_stall() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let started = Instant::now();
    let result = exec.run_trusted("(sleep 5 &); echo parent").unwrap();
    assert!(result.success());
    assert!(started.elapsed() < Duration::from_secs(4), "waited for the grandchild");
    assert_eq!(result.capture.unwrap().stdout.as_bytes(), b"parent\n");
}

#[test]
fn test_run_as_switches_credentials() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));
    let (uid, gid) = if geteuid().is_root() {
        (65534, 65534)
    } else {
        (getuid().as_raw(), getgid().as_raw())
    };

    let check = format!("test \"$(id -u)\" = {} && test \"$(id -g)\" = {}", uid, gid);
    let result = exec.run_as(&check, uid, gid).unwrap();
    assert_eq!(result.exit_code(), Some(0), "child ran with the wrong ids");
}

#[test]
fn test_run_as_leaves_parent_credentials_alone() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));
    let before = (getuid(), geteuid(), getgid(), getegid());

    let _ = exec.run_as("true", 65534, 65534).unwrap();

    assert_eq!(before, (getuid(), geteuid(), getgid(), getegid()));
}

#[test]
fn test_run_as_zero_keeps_current_ids() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));

    let check = format!("test \"$(id -u)\" = {}", geteuid());
    let result = exec.run_as(&check, 0, 0).unwrap();
    assert!(result.success());
}

#[test]
fn test_refused_credential_drop_exits_127() {
    if geteuid().is_root() {
        // Root may switch to any uid.
        return;
    }
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let other_uid = getuid().as_raw() + 1;
    let result = exec
        .system_core(&ExecRequest::unprivileged("echo unreachable", other_uid, getgid().as_raw()).with_tag("dropcheck"))
        .unwrap();
    assert_eq!(result.exit_code(), Some(127));

    let capture = result.capture.unwrap();
    assert!(capture.stdout.is_empty());
    assert!(capture.stderr.to_string_lossy().starts_with("dropcheck: Couldn't setuid: "));
    assert!(audit_text(&dir).contains("] dropcheck["));
}

#[test]
fn test_exec_failure_exits_127() {
    let dir = TempDir::new().unwrap();
    let config = ExecConfig {
        shell: "/nonexistent/bin/sh".into(),
        ..config_in(&dir, true)
    };
    let exec = Executor::new(config);

    let result = exec.run_trusted("true").unwrap();
    assert_eq!(result.exit_code(), Some(127));
    let stderr = result.capture.unwrap().stderr.to_string_lossy();
    assert!(stderr.starts_with("safe_system: execve failed: "), "got {:?}", stderr);
}

#[test]
fn test_invalid_command_is_rejected() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    assert!(matches!(exec.run_trusted("a\0b"), Err(ExecError::InvalidCommand(_))));
    assert!(!dir.path().join("debug.log").exists());
}

#[test]
fn test_empty_command_runs_as_empty_script() {
    let dir = TempDir::new().unwrap();
    let exec = audited(&dir);

    let result = exec.run_trusted("").unwrap();
    assert!(result.success());
    assert!(audit_text(&dir).contains("  CMD: \n"));
}

#[test]
fn test_audit_toggle_is_reread_per_call() {
    let dir = TempDir::new().unwrap();
    let exec = Executor::new(config_in(&dir, false));

    assert!(exec.run_trusted("echo one").unwrap().capture.is_none());
    fs::write(dir.path().join("settings"), "DEBUG_SYSTEM_CALLS=on\n").unwrap();
    assert!(exec.run_trusted("echo two").unwrap().capture.is_some());
    assert!(audit_text(&dir).contains("CMD: echo two"));
}
