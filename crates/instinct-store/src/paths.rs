use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config root directory
pub const HOME_ENV: &str = "INSTINCT_HOME";

/// Layout of the config root directory shared by the capture sink and the daemon
#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root: `$INSTINCT_HOME`, else `~/.claude/homunculus`
    pub fn from_env() -> Result<Self> {
        if let Some(root) = env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(root));
        }

        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(Self::new(home.join(".claude").join("homunculus")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join(".observer.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("observer.log")
    }

    pub fn observations(&self) -> PathBuf {
        self.root.join("observations.jsonl")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("observations.archive")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("observations.lock")
    }

    pub fn disabled_marker(&self) -> PathBuf {
        self.root.join("disabled")
    }

    pub fn instincts_dir(&self) -> PathBuf {
        self.root.join("instincts").join("personal")
    }

    /// Whether the pipeline-wide off switch is present
    pub fn is_disabled(&self) -> bool {
        self.disabled_marker().exists()
    }
}
