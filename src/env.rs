use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::OsString;
use std::path::PathBuf;

/// User-level view of the process environment used by the shell.
///
/// The working directory is deliberately not part of this struct: it is process-wide
/// state shared by the interactive loop and the delayed-command worker, so a `cd` issued
/// from either side is visible to the other.
///
/// The environment contains:
/// - `vars`: overrides consulted before the real process environment.
/// - `should_exit`: a flag that the read loop checks to know when to terminate.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Variables that shadow the process environment (e.g. HOME in tests).
    pub vars: HashMap<String, String>,
    /// When set to true, the interactive loop shuts down after the current line.
    pub should_exit: bool,
}

impl Environment {
    /// Create an environment that reads straight through to the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of an environment variable.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Set or override a variable in `self.vars`. The process environment is untouched.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The user's home directory, as used for `~` expansion.
    pub fn home(&self) -> Option<PathBuf> {
        self.get_var("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }

    /// The raw command search path (`PATH`).
    pub fn search_path(&self) -> Option<OsString> {
        match self.vars.get("PATH") {
            Some(p) => Some(OsString::from(p)),
            None => stdenv::var_os("PATH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::env::Environment;
    use std::path::PathBuf;

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::new();

        // initially absent
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");

        assert_eq!(env.get_var("KEY"), Some("VALUE".to_string()));
    }

    #[test]
    fn test_env_reads_from_process_env() {
        let env = Environment::new();
        assert!(env.get_var("PATH").is_some());
        assert!(env.search_path().is_some());
    }

    #[test]
    fn test_home_override_and_empty_home() {
        let mut env = Environment::new();
        env.set_var("HOME", "/home/u");
        assert_eq!(env.home(), Some(PathBuf::from("/home/u")));

        env.set_var("HOME", "");
        assert_eq!(env.home(), None);
    }

    #[test]
    fn test_search_path_override() {
        let mut env = Environment::new();
        env.set_var("PATH", "/nowhere:/also/nowhere");
        assert_eq!(
            env.search_path().unwrap().to_string_lossy(),
            "/nowhere:/also/nowhere"
        );
    }
}
