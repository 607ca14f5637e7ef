//! File-backed persistence for runs
//!
//! Layout under the store directory:
//!
//! ```text
//! <dir>/<run_id>/run.json      run record, refers to the event file by name
//! <dir>/<run_id>/events.jsonl  one EventRecord per line, in sequence order
//! <dir>/<run_id>/stderr.log    scheduler diagnostics, not part of the log
//! ```

use crate::error::{ScopeError, ScopeResult};
use crate::event::{RunId, SchedulerEvent};
use crate::supervisor::Run;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const STORE_DIR: &str = ".schedscope/runs";
const RUN_FILE: &str = "run.json";
const EVENTS_FILE: &str = "events.jsonl";
const STDERR_FILE: &str = "stderr.log";

/// Durable run record. Events are referenced, not inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(flatten)]
    pub run: Run,
    pub event_log: String,
}

/// Durable event record, one per line of `events.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub run_id: RunId,
    pub sequence: u64,
    pub tick: Option<u64>,
    pub event: SchedulerEvent,
}

impl From<&SchedulerEvent> for EventRecord {
    fn from(event: &SchedulerEvent) -> Self {
        Self {
            run_id: event.run_id,
            sequence: event.sequence,
            tick: event.tick,
            event: event.clone(),
        }
    }
}

/// Store rooted at a directory
#[derive(Debug, Clone)]
pub struct RunStore {
    base_dir: PathBuf,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self::with_base_dir(default_store_dir())
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.base_dir.join(run_id.to_string())
    }

    pub fn exists(&self, run_id: RunId) -> bool {
        self.run_dir(run_id).join(RUN_FILE).exists()
    }

    /// Write (or overwrite) the run record
    pub fn save_run(&self, run: &Run) -> ScopeResult<()> {
        let dir = self.run_dir(run.run_id);
        fs::create_dir_all(&dir)?;
        let record = RunRecord {
            run: run.clone(),
            event_log: EVENTS_FILE.to_string(),
        };
        // Write then rename so readers never see a half-written record
        let tmp = dir.join(format!("{}.tmp", RUN_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(&record)?)?;
        fs::rename(&tmp, dir.join(RUN_FILE))?;
        Ok(())
    }

    pub fn load_run(&self, run_id: RunId) -> ScopeResult<Run> {
        Ok(self.load_record(run_id)?.run)
    }

    pub fn load_record(&self, run_id: RunId) -> ScopeResult<RunRecord> {
        let path = self.run_dir(run_id).join(RUN_FILE);
        if !path.exists() {
            return Err(ScopeError::not_found(format!("stored run {}", run_id)));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Open the event file of a run for appending
    pub fn event_writer(&self, run_id: RunId) -> ScopeResult<EventWriter> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))?;
        Ok(EventWriter {
            writer: BufWriter::new(file),
        })
    }

    /// Append a single event record
    pub fn append_event(&self, event: &SchedulerEvent) -> ScopeResult<()> {
        let mut writer = self.event_writer(event.run_id)?;
        writer.write(event)?;
        writer.flush()
    }

    /// Append events in one go, for logs captured elsewhere
    pub fn save_events(&self, run_id: RunId, events: &[SchedulerEvent]) -> ScopeResult<()> {
        let mut writer = self.event_writer(run_id)?;
        for event in events {
            writer.write(event)?;
        }
        writer.flush()
    }

    /// Read stored events. Corrupt lines are skipped with a warning.
    pub fn load_events(&self, run_id: RunId) -> ScopeResult<Vec<SchedulerEvent>> {
        let record = self.load_record(run_id)?;
        let path = self.run_dir(run_id).join(&record.event_log);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        let mut events = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(&line) {
                Ok(record) => {
                    let mut event = record.event;
                    event.run_id = record.run_id;
                    event.sequence = record.sequence;
                    events.push(event);
                }
                Err(e) => log::warn!(
                    "Skipping corrupt event at {}:{}: {}",
                    path.display(),
                    lineno + 1,
                    e
                ),
            }
        }
        Ok(events)
    }

    pub fn append_stderr(&self, run_id: RunId, line: &str) -> ScopeResult<()> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(STDERR_FILE))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn load_stderr(&self, run_id: RunId) -> ScopeResult<Vec<String>> {
        let path = self.run_dir(run_id).join(STDERR_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(path)?.lines().map(String::from).collect())
    }

    /// All stored runs, newest first. Unreadable records are skipped.
    pub fn list_runs(&self) -> ScopeResult<Vec<Run>> {
        let mut runs = Vec::new();
        if !self.base_dir.exists() {
            return Ok(runs);
        }

        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<RunId>().ok())
            else {
                continue;
            };
            match self.load_run(run_id) {
                Ok(run) => runs.push(run),
                Err(e) => log::warn!("Skipping unreadable run {}: {}", run_id, e),
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Delete a run and all its files
    pub fn delete_run(&self, run_id: RunId) -> ScopeResult<()> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Err(ScopeError::not_found(format!("stored run {}", run_id)));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}

/// Buffered appender for one run's `events.jsonl`
pub struct EventWriter {
    writer: BufWriter<File>,
}

impl EventWriter {
    pub fn write(&mut self, event: &SchedulerEvent) -> ScopeResult<()> {
        serde_json::to_writer(&mut self.writer, &EventRecord::from(event))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> ScopeResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORE_DIR)
}
