//! Credential verification logic.

use crate::config::types::CredentialTarget;
use nix::unistd::{getegid, geteuid, getgid, getuid};
use std::fmt;

/// Real and effective ids of the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentIds {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
}

impl fmt::Display for CurrentIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uid={} euid={} gid={} egid={}",
            self.uid, self.euid, self.gid, self.egid
        )
    }
}

pub fn current_ids() -> CurrentIds {
    CurrentIds {
        uid: getuid().as_raw(),
        euid: geteuid().as_raw(),
        gid: getgid().as_raw(),
        egid: getegid().as_raw(),
    }
}

/// Real and effective ids equal every id `target` asks for.
pub fn matches_target(target: CredentialTarget) -> bool {
    let ids = current_ids();
    let uid_ok = target.uid.map_or(true, |uid| ids.uid == uid && ids.euid == uid);
    let gid_ok = target.gid.map_or(true, |gid| ids.gid == gid && ids.egid == gid);
    uid_ok && gid_ok
}
