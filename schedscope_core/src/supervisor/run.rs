//! Run records

use super::launch::LaunchConfig;
use crate::event::{Pid, RunId, SchedulerEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Finished,
    Error,
    Killed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Finished | RunStatus::Error | RunStatus::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Error => "error",
            RunStatus::Killed => "killed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in [`RunStatus::Error`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The process never started
    LaunchFailed { message: String },
    /// The process exited unsuccessfully after starting
    Crashed {
        exit_code: Option<i32>,
        summary_seen: bool,
    },
}

/// One supervised execution of the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub algorithm: String,
    pub launch: LaunchConfig,
    /// Full argument list passed to the process
    pub args: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// OS pid of the scheduler process
    pub os_pid: Option<u32>,
    /// Process currently holding the simulated CPU
    pub on_cpu: Option<Pid>,
    pub event_count: u64,
    pub summary: Option<SchedulerEvent>,
    pub failure: Option<FailureReason>,
}

impl Run {
    pub fn new(run_id: RunId, launch: LaunchConfig) -> Self {
        Self {
            run_id,
            algorithm: launch.algorithm.clone(),
            launch,
            args: Vec::new(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            os_pid: None,
            on_cpu: None,
            event_count: 0,
            summary: None,
            failure: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Move to a terminal status. Ignored if already terminal.
    pub fn finish(&mut self, status: RunStatus, exit_code: Option<i32>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        self.on_cpu = None;
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}
