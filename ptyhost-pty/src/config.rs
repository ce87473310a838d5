//! Spawn configuration
//!
//! Everything the launcher would otherwise read from the process-wide
//! environment is captured here, so spawning stays testable without
//! touching global state.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PtyError, Result};

/// Shell used when neither the config nor `$SHELL` names one
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Exit status the child reports when the shell could not be executed
pub const EXIT_COMMAND_NOT_FOUND: u8 = 127;

/// Exit status the child reports when terminal setup failed before exec
pub const EXIT_SETUP_FAILED: u8 = 1;

fn default_term() -> String {
    "xterm-256color".to_string()
}

fn default_colorterm() -> String {
    "truecolor".to_string()
}

/// How a session's child process is launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnConfig {
    /// Program to execute (None = the user's shell preference)
    #[serde(default)]
    pub shell: Option<PathBuf>,

    /// The user's `$SHELL`, captured by [`SpawnConfig::from_env`]
    #[serde(skip)]
    pub user_shell: Option<PathBuf>,

    /// Value exported as `TERM`
    #[serde(default = "default_term")]
    pub term: String,

    /// Value exported as `COLORTERM`
    #[serde(default = "default_colorterm")]
    pub colorterm: String,

    /// Base environment handed to the child
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Working directory for the child (None = inherit)
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            shell: None,
            user_shell: None,
            term: default_term(),
            colorterm: default_colorterm(),
            env: Vec::new(),
            cwd: None,
        }
    }
}

impl SpawnConfig {
    /// Snapshot the current process environment and `$SHELL`
    pub fn from_env() -> Self {
        Self {
            user_shell: std::env::var_os("SHELL")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }

    /// Use an explicit program instead of the user's shell
    pub fn with_shell<P: Into<PathBuf>>(mut self, shell: P) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn with_cwd<P: Into<PathBuf>>(mut self, cwd: P) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add or replace one variable of the base environment
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        let key = key.into();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.into()));
        self
    }

    /// The program the child will execute
    pub fn resolve_shell(&self) -> &Path {
        self.shell
            .as_deref()
            .or(self.user_shell.as_deref())
            .unwrap_or_else(|| Path::new(DEFAULT_SHELL))
    }

    /// Build the `envp` block: the base environment with the terminal
    /// capability indicators forced to our values
    pub(crate) fn envp(&self) -> Result<Vec<CString>> {
        let mut envp = Vec::with_capacity(self.env.len() + 2);
        for (key, value) in &self.env {
            if key == "TERM" || key == "COLORTERM" {
                continue;
            }
            envp.push(env_entry(key, value)?);
        }
        envp.push(env_entry("TERM", &self.term)?);
        envp.push(env_entry("COLORTERM", &self.colorterm)?);
        Ok(envp)
    }

    pub(crate) fn program(&self) -> Result<CString> {
        to_cstring(self.resolve_shell().as_os_str())
    }

    pub(crate) fn cwd_cstring(&self) -> Result<Option<CString>> {
        self.cwd
            .as_ref()
            .map(|dir| to_cstring(dir.as_os_str()))
            .transpose()
    }
}

fn env_entry(key: &str, value: &str) -> Result<CString> {
    if key.is_empty() || key.contains('=') {
        return Err(PtyError::InvalidArgument(format!(
            "invalid environment variable name {key:?}"
        )));
    }
    CString::new(format!("{key}={value}"))
        .map_err(|e| PtyError::InvalidArgument(e.to_string()))
}

fn to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|e| PtyError::InvalidArgument(e.to_string()))
}
