//! Launch configuration handed to the scheduler process

use crate::error::{ScopeError, ScopeResult};
use crate::event::RunId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder in the argument template replaced by the config file path
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// One job of the simulated workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u64>,
    /// Command the scheduler runs for this job, if it runs real processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default)]
    pub arrival: u64,
    pub burst: u64,
    #[serde(default)]
    pub priority: i64,
}

impl JobSpec {
    pub fn new(arrival: u64, burst: u64) -> Self {
        Self {
            pid: None,
            cmd: None,
            arrival,
            burst,
            priority: 0,
        }
    }

    pub fn with_pid(mut self, pid: u64) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Multi-level feedback queue parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlfqConfig {
    pub levels: u32,
    /// Quantum per level; empty lets the scheduler pick
    #[serde(default)]
    pub quanta: Vec<u64>,
}

/// Per-run launch request.
///
/// Serialized as `{mode, quantum, mlfq, jobs}`, the shape the scheduler
/// reads from its `--config` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(rename = "mode", alias = "algorithm")]
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantum: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mlfq: Option<MlfqConfig>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
    /// Arguments appended after the configured template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl LaunchConfig {
    pub fn new<S: Into<String>>(algorithm: S) -> Self {
        Self {
            algorithm: algorithm.into(),
            quantum: None,
            mlfq: None,
            jobs: Vec::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_quantum(mut self, quantum: u64) -> Self {
        self.quantum = Some(quantum);
        self
    }

    pub fn with_job(mut self, job: JobSpec) -> Self {
        self.jobs.push(job);
        self
    }

    /// Load from a YAML, TOML or JSON file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> ScopeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScopeError::config(format!(
                "Failed to read launch config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            // JSON is valid YAML, so YAML covers both
            _ => serde_yaml::from_str(&content)
                .or_else(|_| toml::from_str(&content))
                .map_err(|e| {
                    ScopeError::config(format!("Could not parse {}: {}", path.display(), e))
                })?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScopeResult<()> {
        if self.algorithm.trim().is_empty() {
            return Err(ScopeError::invalid_input("algorithm must not be empty"));
        }
        if self.quantum == Some(0) {
            return Err(ScopeError::invalid_input("quantum must be greater than zero"));
        }
        if let Some(mlfq) = &self.mlfq {
            if mlfq.levels == 0 {
                return Err(ScopeError::invalid_input("mlfq needs at least one level"));
            }
            if !mlfq.quanta.is_empty() && mlfq.quanta.len() != mlfq.levels as usize {
                return Err(ScopeError::invalid_input(format!(
                    "mlfq has {} levels but {} quanta",
                    mlfq.levels,
                    mlfq.quanta.len()
                )));
            }
        }
        Ok(())
    }

    /// Write the scheduler's config file as `run-<id>.json` under `dir`
    pub fn write_config_file(&self, dir: &Path, run_id: RunId) -> ScopeResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("run-{}.json", run_id));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Expand the argument template and append `extra_args`
    pub fn command_args(&self, template: &[String], config_path: &Path) -> Vec<String> {
        let config_path = config_path.to_string_lossy();
        template
            .iter()
            .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &config_path))
            .chain(self.extra_args.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_serialized_shape() {
        let config = LaunchConfig::new("rr")
            .with_quantum(2)
            .with_job(JobSpec::new(0, 5).with_pid(1));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["mode"], "rr");
        assert_eq!(json["quantum"], 2);
        assert_eq!(json["jobs"][0]["burst"], 5);
        assert!(json.get("mlfq").is_none());
    }

    #[test]
    fn test_algorithm_alias() {
        let config: LaunchConfig =
            serde_json::from_str(r#"{"algorithm":"fcfs","jobs":[{"burst":3}]}"#).unwrap();
        assert_eq!(config.algorithm, "fcfs");
        assert_eq!(config.jobs[0].arrival, 0);
    }

    #[test]
    fn test_from_file_formats() {
        let dir = tempdir().unwrap();

        let yaml = dir.path().join("rr.yaml");
        fs::write(&yaml, "mode: rr\nquantum: 4\njobs:\n  - arrival: 0\n    burst: 3\n").unwrap();
        assert_eq!(LaunchConfig::from_file(&yaml).unwrap().quantum, Some(4));

        let toml_path = dir.path().join("mlfq.toml");
        fs::write(
            &toml_path,
            "mode = \"mlfq\"\n[mlfq]\nlevels = 2\nquanta = [2, 4]\n[[jobs]]\nburst = 6\n",
        )
        .unwrap();
        let config = LaunchConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.mlfq.unwrap().quanta, vec![2, 4]);

        let json = dir.path().join("fcfs.json");
        fs::write(&json, r#"{"mode":"fcfs","jobs":[]}"#).unwrap();
        assert_eq!(LaunchConfig::from_file(&json).unwrap().algorithm, "fcfs");
    }

    #[test]
    fn test_validate() {
        assert!(LaunchConfig::new("").validate().is_err());
        assert!(LaunchConfig::new("rr").with_quantum(0).validate().is_err());

        let mut config = LaunchConfig::new("mlfq");
        config.mlfq = Some(MlfqConfig {
            levels: 3,
            quanta: vec![1, 2],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_command_args() {
        let dir = tempdir().unwrap();
        let run_id = RunId::new();
        let mut config = LaunchConfig::new("fcfs");
        config.extra_args = vec!["--verbose".to_string()];
        let path = config.write_config_file(dir.path(), run_id).unwrap();
        assert!(path.ends_with(format!("run-{}.json", run_id)));

        let template = vec!["--config".to_string(), CONFIG_PLACEHOLDER.to_string()];
        let args = config.command_args(&template, &path);
        assert_eq!(args[0], "--config");
        assert_eq!(args[1], path.to_string_lossy());
        assert_eq!(args[2], "--verbose");

        let written: LaunchConfig =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, config);
    }
}
