//! Thin wrappers around Linux kernel primitives.
//!
//! Process-global syscalls live here, each with a SAFETY comment where `unsafe`.
//! Dependency direction: signal -> rlimit -> credentials

pub mod credentials;
pub mod rlimit;
pub mod signal;
