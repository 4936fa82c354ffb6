//! privexec: privilege-separated shell command execution
//! for setuid-root helper programs on a firewall appliance.
//!
//! # Architecture
//!
//! ## Startup hardening ([`privilege`])
//! - [`privilege::initialize_privilege`]: known-state initialization, first thing in `main`
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: ignore every catchable signal
//! - [`kernel::rlimit`]: core dumps off, descriptor table size
//! - [`kernel::credentials`]: reset to root, ordered drop to a target uid/gid
//!
//! ## Execution Control ([`exec`])
//! - [`exec::executor`]: `system_core`, `run_trusted`, `run_as`
//! - [`exec::preexec`]: Type-state enforced child sequence
//! - [`exec::capture`]: Pipe multiplexing for audited runs
//! - [`exec::fork`]: Process-creation seam
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Settings-toggled, size-rotated command audit log
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared type definitions and the error enum
//! - [`config::settings`]: `KEY=VALUE` settings store lookup
//!
//! ## Utilities ([`utils`])
//! - [`utils::fd_closure`]: FD closure and stdio repair
//! - [`utils::env_hygiene`]: Trusted environment table
//! - [`utils::output`]: Bounded output collection
//!
//! # Design Principles
//!
//! 1. **Nothing inherited is trusted** - environment, descriptors and signal
//!    dispositions come from this crate, not from the invoker
//! 2. **Groups before ids** - gid changes always precede uid changes
//! 3. **The child never allocates** - everything it needs is built before fork
//! 4. **Audit never fails a command** - logging problems are logged and dropped

// Startup hardening
pub mod privilege;

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the privexec binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use config::ExecConfig;
pub use exec::{run_as, run_trusted, system_core, Executor};
pub use privilege::initialize_privilege;
pub use utils::env_hygiene::TrustedEnvironment;
