//! Layout of the hodos state directory.

use crate::error::ConfigError;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the state directory.
pub const HOME_ENV: &str = "HODOS_HOME";

const CONFIG_CANDIDATES: &[&str] = &["config.json", "config.jsonc", "config.yaml", "config.yml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HodosPaths {
    home: PathBuf,
}

impl HodosPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `$HODOS_HOME` when set, otherwise `~/.hodos`.
    pub fn resolve() -> Result<Self, ConfigError> {
        if let Some(home) = env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }

        dirs::home_dir()
            .map(|home| Self::new(home.join(".hodos")))
            .ok_or(ConfigError::NoHomeDir)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn pid_file(&self) -> PathBuf {
        self.home.join("hodos.pid")
    }

    pub fn reference_count_file(&self) -> PathBuf {
        self.home.join("hodos.refcount")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn service_log_file(&self) -> PathBuf {
        self.logs_dir().join("service.log")
    }

    pub fn audit_log_file(&self) -> PathBuf {
        self.logs_dir().join("traffic.jsonl")
    }

    pub fn config_candidates(&self) -> Vec<PathBuf> {
        CONFIG_CANDIDATES
            .iter()
            .map(|name| self.home.join(name))
            .collect()
    }

    /// First candidate config file that exists.
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.config_candidates().into_iter().find(|p| p.exists())
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.home)?;
        fs::create_dir_all(self.logs_dir())
    }
}
