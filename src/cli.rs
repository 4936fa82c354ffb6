use crate::config::types::{ExecError, ExecRequest, ExecResult, TRUSTED_TAG, UNPRIVILEGED_TAG};
use crate::config::ExecConfig;
use crate::exec::Executor;
use crate::privilege::initialize_privilege;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit status for failures of the exec core itself.
pub const CORE_FAILURE_EXIT: i32 = 125;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (root invokers only)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a shell command with the current (root) credentials
    Run {
        /// Program tag used in diagnostics and audit records
        #[arg(long)]
        tag: Option<String>,
        /// Command line passed to `sh -c`
        command: String,
    },
    /// Run a shell command as another user and group
    RunAs {
        /// Target user id (0 keeps the current uid)
        #[arg(long)]
        uid: u32,
        /// Target group id (0 keeps the current gid)
        #[arg(long)]
        gid: u32,
        /// Program tag used in diagnostics and audit records
        #[arg(long)]
        tag: Option<String>,
        /// Command line passed to `sh -c`
        command: String,
    },
    /// Show whether command auditing is enabled
    AuditStatus,
}

/// Entry point for the `privexec` binary. Never returns.
pub fn run() -> ! {
    // Read before initialization: reset_to_root rewrites the real uid.
    let invoked_by_root = nix::unistd::getuid().is_root();

    if !initialize_privilege() {
        std::process::exit(1);
    }

    env_logger::init();

    let cli = Cli::parse();
    match dispatch(cli, invoked_by_root) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("privexec: {:#}", e);
            std::process::exit(CORE_FAILURE_EXIT);
        }
    }
}

fn dispatch(cli: Cli, invoked_by_root: bool) -> Result<i32> {
    authorize(&cli.command, invoked_by_root)?;
    let config = load_config(cli.config, invoked_by_root)?;
    let executor = Executor::new(config);

    let request = match cli.command {
        Commands::Run { tag, command } => {
            ExecRequest::trusted(command).with_tag(tag.unwrap_or_else(|| TRUSTED_TAG.to_string()))
        }
        Commands::RunAs {
            uid,
            gid,
            tag,
            command,
        } => ExecRequest::unprivileged(command, uid, gid)
            .with_tag(tag.unwrap_or_else(|| UNPRIVILEGED_TAG.to_string())),
        Commands::AuditStatus => {
            let audit = executor.audit_log();
            let state = if audit.is_enabled() { "enabled" } else { "disabled" };
            println!("auditing: {}", state);
            println!("log: {}", audit.log_path().display());
            return Ok(0);
        }
    };

    let result = executor
        .system_core(&request)
        .with_context(|| format!("failed to run '{}'", request.command))?;
    Ok(exit_code_for(&result))
}

/// Running commands is reserved for a root invoker. The binary is installed
/// setuid root, so the effective uid says nothing about who called it.
fn authorize(command: &Commands, invoked_by_root: bool) -> Result<()> {
    match command {
        Commands::Run { .. } | Commands::RunAs { .. } if !invoked_by_root => Err(ExecError::Privilege(
            "refused: only root may run commands through privexec".to_string(),
        )
        .into()),
        _ => Ok(()),
    }
}

fn load_config(path: Option<PathBuf>, invoked_by_root: bool) -> Result<ExecConfig> {
    match path {
        Some(path) if invoked_by_root => {
            ExecConfig::load_from_file(&path).with_context(|| format!("loading {}", path.display()))
        }
        Some(path) => Err(ExecError::Config(format!(
            "--config {} refused: only root may override configuration",
            path.display()
        ))
        .into()),
        None => Ok(ExecConfig::default()),
    }
}

/// Shell-style status: exit code, or 128 + signal number.
pub fn exit_code_for(result: &ExecResult) -> i32 {
    if let Some(code) = result.exit_code() {
        return code;
    }
    match result.signal() {
        Some(sig) => 128 + sig as i32,
        None => CORE_FAILURE_EXIT,
    }
}
