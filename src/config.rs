//! Configuration loading and defaults for xss-lock.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for xss-lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Locker command and its arguments.
    pub locker: Vec<String>,

    /// Command run when the screen saver activates, before locking.
    /// Split into words like a shell would.
    pub notifier: Option<String>,

    /// Don't delay sleep for locking (default: false).
    pub ignore_sleep: bool,

    /// Pass the sleep delay lock to the locker (default: false).
    /// The locker must close it once the screen is locked.
    pub transfer_sleep_lock: bool,

    /// logind session id. If unset, the session of this process is used.
    pub session_id: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = Self::default_path()
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    /// `$XDG_CONFIG_HOME/xss-lock/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("xss-lock").join("config.toml"))
    }

    /// Check that the configuration can be run.
    pub fn validate(&self) -> Result<()> {
        if self.locker.is_empty() {
            bail!("No locker specified");
        }
        self.notifier_command()?;
        Ok(())
    }

    /// Notifier argument vector, if one is configured.
    pub fn notifier_command(&self) -> Result<Option<Vec<String>>> {
        let Some(notifier) = self.notifier.as_deref() else {
            return Ok(None);
        };

        match shlex::split(notifier) {
            Some(words) if !words.is_empty() => Ok(Some(words)),
            Some(_) => bail!("Empty notifier command"),
            None => bail!("Failed to parse notifier command: {}", notifier),
        }
    }
}
