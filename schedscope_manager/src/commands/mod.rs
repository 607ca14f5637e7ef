//! Subcommand implementations for the `schedscope` binary

pub mod replay;
pub mod run;
pub mod runs;

use anyhow::{Context, Result};
use schedscope_core::{RunId, ScopeConfig};
use std::path::{Path, PathBuf};

const CONFIG_NAMES: [&str; 3] = ["schedscope.yaml", "schedscope.yml", "schedscope.toml"];

/// Config from `--config`, else the first of `./schedscope.{yaml,yml,toml}`
/// and `~/.schedscope/config.yaml`, else defaults
pub fn load_config(path: Option<&Path>) -> Result<ScopeConfig> {
    if let Some(path) = path {
        return ScopeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()));
    }

    let mut candidates: Vec<PathBuf> = CONFIG_NAMES.iter().map(PathBuf::from).collect();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".schedscope").join("config.yaml"));
    }
    for candidate in candidates {
        if candidate.is_file() {
            tracing::debug!("Using config {}", candidate.display());
            return ScopeConfig::from_file(&candidate)
                .with_context(|| format!("loading config {}", candidate.display()));
        }
    }
    Ok(ScopeConfig::default())
}

pub fn parse_run_id(s: &str) -> Result<RunId> {
    s.parse::<RunId>()
        .with_context(|| format!("'{}' is not a run id", s))
}
