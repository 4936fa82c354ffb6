//! Utilities
//!
//! Cross-cutting utilities for FD closure, environment hygiene, and output capture.

pub mod env_hygiene;
pub mod fd_closure;
pub mod output;
