//! Execution control
//!
//! Fork, sanitize and exec a shell command, then capture and reap it.

pub mod capture;
pub mod executor;
pub mod fork;
pub mod preexec;

pub use executor::{run_as, run_trusted, system_core, Executor};
pub use fork::{ForkOutcome, Forker, SystemForker};
