//! Credential transitions for the privilege initializer and forked children.

use super::validation::matches_target;
use crate::config::types::{CredentialTarget, ExecError, Result};
use nix::errno::Errno;
use nix::unistd::{geteuid, setgid, setgroups, setresgid, setresuid, setuid, Gid, Uid};

/// Clear supplementary groups, then set gid and uid to 0.
///
/// Used by a setuid-root entry point to turn "effective root" into full root.
pub fn reset_to_root() -> Result<()> {
    setgroups(&[])
        .map_err(|e| ExecError::Privilege(format!("Couldn't clear group list: {}", e)))?;
    // CRITICAL: GID before UID
    setgid(Gid::from_raw(0))
        .map_err(|e| ExecError::Privilege(format!("Couldn't setgid(0): {}", e)))?;
    setuid(Uid::from_raw(0))
        .map_err(|e| ExecError::Privilege(format!("Couldn't setuid(0): {}", e)))?;

    log::debug!("Credentials reset to uid=0 gid=0 with no supplementary groups");
    Ok(())
}

/// Step of a child-side credential drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropStage {
    Groups,
    Gid,
    Uid,
    Verify,
}

impl DropStage {
    /// Static diagnostic text, written from the child without allocating.
    pub fn message(self) -> &'static str {
        match self {
            DropStage::Groups => "Couldn't setgroups",
            DropStage::Gid => "Couldn't setgid",
            DropStage::Uid => "Couldn't setuid",
            DropStage::Verify => "Credential verification failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropFailure {
    pub stage: DropStage,
    pub errno: Errno,
}

impl DropFailure {
    fn at(stage: DropStage) -> impl FnOnce(Errno) -> DropFailure {
        move |errno| DropFailure { stage, errno }
    }
}

/// Switch to `target` and verify the result.
///
/// Runs in the forked child between fork and exec: only raw syscalls, no
/// logging, no allocation.
pub fn drop_to_target(target: CredentialTarget) -> std::result::Result<(), DropFailure> {
    if target.is_unchanged() {
        return Ok(());
    }

    if let Some(gid) = target.gid {
        let gid = Gid::from_raw(gid);
        // Only root may rewrite the group list; anyone else has nothing extra to shed.
        if geteuid().is_root() {
            setgroups(&[gid]).map_err(DropFailure::at(DropStage::Groups))?;
        }
        setresgid(gid, gid, gid).map_err(DropFailure::at(DropStage::Gid))?;
    }

    if let Some(uid) = target.uid {
        let uid = Uid::from_raw(uid);
        setresuid(uid, uid, uid).map_err(DropFailure::at(DropStage::Uid))?;
    }

    if !matches_target(target) {
        return Err(DropFailure {
            stage: DropStage::Verify,
            errno: Errno::EPERM,
        });
    }

    Ok(())
}
