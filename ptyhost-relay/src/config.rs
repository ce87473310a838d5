//! Configuration for the relay
//!
//! Sources, highest priority first:
//! - CLI arguments
//! - Environment variables (`PTYHOST_SHELL`, `PTYHOST_SCROLLBACK`)
//! - Config file (`<config dir>/ptyhost/config.toml`, or `--config`)
//! - Defaults
//!
//! The merged result is validated before use.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use ptyhost_mux::SupervisorConfig;
use ptyhost_pty::SpawnConfig;
use serde::{Deserialize, Serialize};

/// Largest replay buffer a config may ask for
const MAX_SCROLLBACK: usize = 64 * 1024 * 1024;

/// Longest grace period before a kill is forced
const MAX_KILL_GRACE_MS: u64 = 60_000;

/// CLI arguments for the relay
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ptyhost-relay")]
#[command(version)]
#[command(about = "Run a shell in a supervised PTY and relay this terminal to it", long_about = None)]
pub struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Shell to run instead of $SHELL
    #[arg(short, long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// Working directory for the shell
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Bytes of output kept for replay
    #[arg(long, value_name = "BYTES")]
    pub scrollback: Option<usize>,

    /// Milliseconds a killed shell gets before SIGKILL
    #[arg(long, value_name = "MS")]
    pub kill_grace_ms: Option<u64>,

    /// Initial columns when this terminal's size is unknown
    #[arg(long, value_name = "COLS")]
    pub columns: Option<u16>,

    /// Initial rows when this terminal's size is unknown
    #[arg(long, value_name = "ROWS")]
    pub rows: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command (None = $SHELL, then /bin/sh)
    pub shell: Option<String>,
    /// Working directory for the shell
    pub cwd: Option<PathBuf>,
    /// Exported as TERM
    pub term: String,
    /// Exported as COLORTERM
    pub colorterm: String,
    /// Replay buffer size in bytes
    pub scrollback_bytes: usize,
    /// Grace period for a graceful kill, in milliseconds
    pub kill_grace_ms: u64,
    /// Fallback size (columns, rows)
    pub dimensions: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        let spawn = SpawnConfig::default();
        let supervisor = SupervisorConfig::default();
        Self {
            shell: None,
            cwd: None,
            term: spawn.term,
            colorterm: spawn.colorterm,
            scrollback_bytes: supervisor.scrollback_limit,
            kill_grace_ms: supervisor.kill_grace.as_millis() as u64,
            dimensions: (80, 24),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration with full precedence:
    /// CLI args > environment variables > config file > defaults
    pub fn load_with_args(args: &CliArgs) -> Result<Self, ConfigError> {
        Self::load_with(args, |key| env::var(key).ok())
    }

    fn load_with<F>(args: &CliArgs, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = &args.config {
            // An explicitly named file has to be usable
            config = Self::load_from_file(path)?;
        } else if let Some(path) = Self::default_config_path() {
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(file_config) => config = file_config,
                    Err(e) => {
                        log::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        config.apply_env(lookup)?;
        config.apply_cli_args(args);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file {}: {}", path.display(), e),
            field: None,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file: {}", e),
            field: None,
        })
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("PTYHOST_SHELL") {
            self.shell = Some(val);
        }
        if let Some(val) = lookup("PTYHOST_SCROLLBACK") {
            self.scrollback_bytes = val.trim().parse().map_err(|_| {
                ConfigError::field(
                    "PTYHOST_SCROLLBACK",
                    format!("expected a byte count, got '{}'", val),
                )
            })?;
        }
        Ok(())
    }

    fn apply_cli_args(&mut self, args: &CliArgs) {
        if let Some(shell) = &args.shell {
            self.shell = Some(shell.clone());
        }
        if let Some(cwd) = &args.cwd {
            self.cwd = Some(cwd.clone());
        }
        if let Some(bytes) = args.scrollback {
            self.scrollback_bytes = bytes;
        }
        if let Some(ms) = args.kill_grace_ms {
            self.kill_grace_ms = ms;
        }
        if let Some(cols) = args.columns {
            self.dimensions.0 = cols;
        }
        if let Some(rows) = args.rows {
            self.dimensions.1 = rows;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                return Err(ConfigError::field("shell", "Shell must not be empty"));
            }
            if shell.contains('\0') {
                return Err(ConfigError::field("shell", "Shell contains a NUL byte"));
            }
        }

        for (field, value) in [("term", &self.term), ("colorterm", &self.colorterm)] {
            if value.is_empty() || value.contains('\0') || value.contains('=') {
                return Err(ConfigError::field(
                    field,
                    format!("Invalid terminal capability value '{}'", value),
                ));
            }
        }

        if self.scrollback_bytes > MAX_SCROLLBACK {
            return Err(ConfigError::field(
                "scrollback_bytes",
                format!("Scrollback must be at most {} bytes", MAX_SCROLLBACK),
            ));
        }

        if self.kill_grace_ms > MAX_KILL_GRACE_MS {
            return Err(ConfigError::field(
                "kill_grace_ms",
                format!("Kill grace must be at most {} ms", MAX_KILL_GRACE_MS),
            ));
        }

        if self.dimensions.0 == 0 || self.dimensions.1 == 0 {
            return Err(ConfigError::field(
                "dimensions",
                "Columns and rows must be non-zero",
            ));
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ptyhost").join("config.toml"))
    }

    /// Launch settings for the shell, on top of this process's environment
    pub fn spawn_config(&self) -> SpawnConfig {
        let mut spawn = SpawnConfig::from_env();
        if let Some(shell) = &self.shell {
            spawn = spawn.with_shell(shell);
        }
        if let Some(cwd) = &self.cwd {
            spawn = spawn.with_cwd(cwd);
        }
        spawn.term = self.term.clone();
        spawn.colorterm = self.colorterm.clone();
        spawn
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            spawn: self.spawn_config(),
            scrollback_limit: self.scrollback_bytes,
            kill_grace: Duration::from_millis(self.kill_grace_ms),
            ..SupervisorConfig::default()
        }
    }
}
