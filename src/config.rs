//! Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub graph: GraphConfig,
}

/// Store-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// How long a writer waits for the database lock before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskava/engine.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Bounds on graph traversals over possibly malformed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum tasks visited by one dependency reachability check.
    /// Hitting the cap rejects the edge: acyclicity could not be proven.
    #[serde(default = "default_max_reachability_nodes")]
    pub max_reachability_nodes: u32,

    /// Maximum levels walked by subtree and ancestor queries.
    #[serde(default = "default_max_hierarchy_depth")]
    pub max_hierarchy_depth: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_reachability_nodes: default_max_reachability_nodes(),
            max_hierarchy_depth: default_max_hierarchy_depth(),
        }
    }
}

fn default_max_reachability_nodes() -> u32 {
    100_000
}

fn default_max_hierarchy_depth() -> u32 {
    1_000
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Candidate config files, highest priority first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var("TASKAVA_CONFIG_PATH") {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("taskava/config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".taskava").join("config.yaml"));
        }
        paths
    }

    /// Load the first config file that exists, then apply environment overrides.
    ///
    /// A file that exists but fails to parse is an error; missing files fall
    /// through to defaults.
    pub fn load_or_default() -> Result<Self> {
        let mut config = Self::default();
        for path in Self::search_paths() {
            if path.is_file() {
                debug!(path = %path.display(), "loading config");
                config = Self::load(&path)?;
                break;
            }
        }
        config.apply_env();
        Ok(config)
    }

    /// Apply `TASKAVA_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("TASKAVA_DB_PATH") {
            self.store.db_path = PathBuf::from(db_path);
        }

        if let Ok(timeout) = std::env::var("TASKAVA_BUSY_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.store.busy_timeout_ms = timeout;
            }
        }

        if let Ok(cap) = std::env::var("TASKAVA_MAX_REACHABILITY_NODES") {
            if let Ok(cap) = cap.parse() {
                self.graph.max_reachability_nodes = cap;
            }
        }

        if let Ok(depth) = std::env::var("TASKAVA_MAX_HIERARCHY_DEPTH") {
            if let Ok(depth) = depth.parse() {
                self.graph.max_hierarchy_depth = depth;
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.store.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
