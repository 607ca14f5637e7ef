//! Configuration for the pipeline and the tools around it
//!
//! # Example YAML
//!
//! ```yaml
//! scheduler:
//!   binary: ./target/release/scheduler
//!   args: ["--config", "{config}"]
//!   max_concurrent_runs: 4
//! broadcast:
//!   buffer_capacity: 2048
//! playback:
//!   base_period_ms: 250
//! server:
//!   port: 8080
//! ```

use crate::error::{ScopeError, ScopeResult};
use crate::live::DEFAULT_BUFFER_CAPACITY;
use crate::playback::{MAX_SPEED, MIN_SPEED};
use crate::runlog::store::default_store_dir;
use crate::supervisor::CONFIG_PLACEHOLDER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the scheduler process is launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Program to run
    pub binary: String,
    /// Argument template; `{config}` becomes the generated config file path
    pub args: Vec<String>,
    /// Where per-run config files are written
    pub work_dir: PathBuf,
    /// 0 means unlimited
    pub max_concurrent_runs: usize,
    /// Ended runs kept in memory once persisted; older ones are reloaded
    /// from the store on demand. 0 keeps every run.
    pub retain_finished_runs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            binary: "scheduler".to_string(),
            args: vec!["--config".to_string(), CONFIG_PLACEHOLDER.to_string()],
            work_dir: std::env::temp_dir().join("schedscope"),
            max_concurrent_runs: 0,
            retain_finished_runs: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Messages buffered per subscriber before it is disconnected
    pub buffer_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub base_period_ms: u64,
    pub default_speed: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            base_period_ms: 1000,
            default_speed: 1.0,
        }
    }
}

impl PlaybackConfig {
    pub fn base_period(&self) -> Duration {
        Duration::from_millis(self.base_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub scheduler: SchedulerConfig,
    pub broadcast: BroadcastConfig,
    pub playback: PlaybackConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

impl ScopeConfig {
    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> ScopeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ScopeError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_yaml(&contents).or_else(|_| Self::from_toml(&contents)),
        }?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> ScopeResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ScopeError::config(format!("Failed to parse YAML config: {}", e)))
    }

    pub fn from_toml(contents: &str) -> ScopeResult<Self> {
        toml::from_str(contents)
            .map_err(|e| ScopeError::config(format!("Failed to parse TOML config: {}", e)))
    }

    pub fn validate(&self) -> ScopeResult<()> {
        if self.scheduler.binary.trim().is_empty() {
            return Err(ScopeError::config("scheduler.binary must not be empty"));
        }
        if self.broadcast.buffer_capacity == 0 {
            return Err(ScopeError::config("broadcast.buffer_capacity must be at least 1"));
        }
        if self.playback.base_period_ms == 0 {
            return Err(ScopeError::config("playback.base_period_ms must be at least 1"));
        }
        if !(MIN_SPEED..=MAX_SPEED).contains(&self.playback.default_speed) {
            return Err(ScopeError::config(format!(
                "playback.default_speed must be between {} and {}",
                MIN_SPEED, MAX_SPEED
            )));
        }
        Ok(())
    }
}
