//! Daemon configuration.
//!
//! Read from an optional TOML file; every field has a default, so a missing
//! file or a partial one is fine.
//!
//! ```toml
//! data_dir = "/var/lib/cindex"
//! parse_workers = 4
//! job_workers = 2
//! debounce_ms = 200
//! watch = true
//! default_compiler_flags = ["-std=c++17"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Root for the registry database and saved units
    pub data_dir: PathBuf,
    /// Workers for status and other short jobs
    pub job_workers: usize,
    /// Workers for parses and reparses
    pub parse_workers: usize,
    /// Debounce window for file change events
    pub debounce_ms: u64,
    /// How long shutdown waits for queued jobs
    pub drain_timeout_ms: u64,
    /// Reparse units when their source changes
    pub watch: bool,
    /// Flags used for `add-source-file` when the client gives none
    pub default_compiler_flags: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            data_dir: paths::default_data_dir(),
            job_workers: 2,
            parse_workers: cpus.max(1),
            debounce_ms: 100,
            drain_timeout_ms: 5_000,
            watch: true,
            default_compiler_flags: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or defaults when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| IndexError::malformed(format!("Failed to parse config: {}", e)))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn ast_dir(&self) -> PathBuf {
        paths::ast_dir(&self.data_dir)
    }

    pub fn registry_db(&self) -> PathBuf {
        paths::registry_db_path(&self.data_dir)
    }
}
