//! UID/GID transitions.
//!
//! CRITICAL: groups and gid MUST change before uid. Once the uid is gone the
//! process may no longer be allowed to shed an elevated group.

mod transition;
mod validation;

pub use transition::{drop_to_target, reset_to_root, DropFailure, DropStage};
pub use validation::{current_ids, matches_target, CurrentIds};
