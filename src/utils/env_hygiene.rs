/// Environment hygiene for spawned commands
///
/// Every child gets exactly the trusted table below and nothing inherited from
/// the caller. `PATH`, `IFS`, `ENV`, `BASH_ENV` and friends from a setuid
/// invoker never reach the shell.
use crate::config::types::{ExecError, Result};
use std::ffi::CString;

const TRUSTED_ENTRIES: [(&str, &str); 3] = [
    ("PATH", "/usr/bin:/usr/sbin:/sbin:/bin"),
    ("SHELL", "/bin/sh"),
    ("TERM", "dumb"),
];

/// Fixed, ordered environment handed to `execve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedEnvironment {
    entries: &'static [(&'static str, &'static str)],
}

impl TrustedEnvironment {
    /// The appliance's standard table: PATH, SHELL, TERM.
    pub const fn standard() -> Self {
        Self {
            entries: &TRUSTED_ENTRIES,
        }
    }

    pub fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }

    pub fn get(&self, key: &str) -> Option<&'static str> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// `KEY=VALUE` strings in table order.
    pub fn assignments(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(|(k, v)| format!("{}={}", k, v))
    }

    /// Build the `envp` vector. Done before fork so the child never allocates.
    pub fn to_envp(&self) -> Result<Vec<CString>> {
        self.assignments()
            .map(|entry| {
                CString::new(entry)
                    .map_err(|_| ExecError::Config("trusted environment contains NUL byte".to_string()))
            })
            .collect()
    }
}

impl Default for TrustedEnvironment {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_is_fixed_and_ordered() {
        let env = TrustedEnvironment::standard();
        let entries: Vec<String> = env.assignments().collect();
        assert_eq!(
            entries,
            vec![
                "PATH=/usr/bin:/usr/sbin:/sbin:/bin".to_string(),
                "SHELL=/bin/sh".to_string(),
                "TERM=dumb".to_string(),
            ]
        );
    }

    #[test]
    fn table_ignores_process_environment() {
        std::env::set_var("PRIVEXEC_ENV_PROBE", "leak");
        let env = TrustedEnvironment::standard();
        assert_eq!(env.get("PRIVEXEC_ENV_PROBE"), None);
        assert_eq!(env.get("IFS"), None);
        assert_eq!(env.entries().len(), 3);
        std::env::remove_var("PRIVEXEC_ENV_PROBE");
    }

    #[test]
    fn envp_matches_assignments() {
        let env = TrustedEnvironment::standard();
        let envp = env.to_envp().unwrap();
        assert_eq!(envp.len(), 3);
        assert_eq!(envp[2].to_str().unwrap(), "TERM=dumb");
    }
}
