//! Observability
//!
//! Settings-toggled command audit trail.

pub mod audit;
