//! Launching and supervising scheduler processes
//!
//! Each run gets one task that owns the child process. Standard output is
//! read line by line, normalized and appended to the [`RunLog`]; standard
//! error goes to subscribers and the run's stderr file. When the process
//! exits the run is finalized, its log sealed and the record persisted.

mod launch;
mod run;

pub use launch::{JobSpec, LaunchConfig, MlfqConfig, CONFIG_PLACEHOLDER};
pub use run::{FailureReason, Run, RunStatus};

use crate::config::{SchedulerConfig, ScopeConfig};
use crate::error::{ScopeError, ScopeResult};
use crate::event::{normalize, EventKind, Pid, RunId, SchedulerEvent};
use crate::live::{Broadcaster, LiveMessage};
use crate::runlog::store::{EventWriter, RunStore};
use crate::runlog::RunLog;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

const KILL_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct RunSlot {
    run: Arc<Mutex<Run>>,
    kill: Arc<Notify>,
    done: watch::Receiver<bool>,
}

struct Inner {
    config: SchedulerConfig,
    log: Arc<RunLog>,
    broadcaster: Broadcaster,
    store: RunStore,
    runs: RwLock<HashMap<RunId, RunSlot>>,
}

/// Starts, stops and tracks scheduler runs
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        config: SchedulerConfig,
        log: Arc<RunLog>,
        broadcaster: Broadcaster,
        store: RunStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                log,
                broadcaster,
                store,
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Wire a fresh log, broadcaster and store from configuration
    pub fn from_config(config: &ScopeConfig) -> Self {
        let log = Arc::new(RunLog::new());
        let broadcaster = Broadcaster::new(config.broadcast.buffer_capacity);
        log.add_listener(Arc::new(broadcaster.clone()));
        Self::new(
            config.scheduler.clone(),
            log,
            broadcaster,
            RunStore::with_base_dir(config.store.dir.clone()),
        )
    }

    pub fn log(&self) -> &Arc<RunLog> {
        &self.inner.log
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    pub fn store(&self) -> &RunStore {
        &self.inner.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Launch the scheduler for `launch` and begin ingesting its output.
    ///
    /// The run is `running` as soon as this returns. If the process cannot
    /// be spawned the run is recorded as `error` with
    /// [`FailureReason::LaunchFailed`] and the launch error is returned.
    pub async fn start(&self, launch: LaunchConfig) -> ScopeResult<RunId> {
        launch.validate()?;

        let run_id = RunId::new();
        let run = Arc::new(Mutex::new(Run::new(run_id, launch.clone())));
        let (done_tx, done_rx) = watch::channel(false);
        let kill = Arc::new(Notify::new());

        // Check the cap and reserve the slot under one lock so concurrent
        // starts cannot both pass
        {
            let mut runs = self.inner.runs.write();
            let limit = self.inner.config.max_concurrent_runs;
            if limit > 0 {
                let active = runs
                    .values()
                    .filter(|slot| !slot.run.lock().status.is_terminal())
                    .count();
                if active >= limit {
                    return Err(ScopeError::LimitReached(format!(
                        "{} runs already active",
                        limit
                    )));
                }
            }
            runs.insert(
                run_id,
                RunSlot {
                    run: run.clone(),
                    kill: kill.clone(),
                    done: done_rx,
                },
            );
        }
        self.inner.log.create(run_id);

        let spawned = launch
            .write_config_file(&self.inner.config.work_dir, run_id)
            .and_then(|path| {
                let args = launch.command_args(&self.inner.config.args, &path);
                log::info!(
                    "Starting run {} ({}): {} {}",
                    run_id,
                    launch.algorithm,
                    self.inner.config.binary,
                    args.join(" ")
                );
                run.lock().args = args.clone();
                Command::new(&self.inner.config.binary)
                    .args(&args)
                    .current_dir(&self.inner.config.work_dir)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(ScopeError::from)
            });

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let message = e.to_string();
                log::error!("Run {} failed to launch: {}", run_id, message);
                let snapshot = {
                    let mut run = run.lock();
                    run.finish(RunStatus::Error, None);
                    run.failure = Some(FailureReason::LaunchFailed {
                        message: message.clone(),
                    });
                    run.clone()
                };
                self.inner.log.seal(run_id);
                if let Err(e) = self.inner.store.save_run(&snapshot) {
                    log::warn!("Failed to persist run {}: {}", run_id, e);
                }
                self.inner.broadcaster.publish(LiveMessage::RunFinished {
                    run_id,
                    status: snapshot.status,
                    exit_code: None,
                    failure: snapshot.failure,
                });
                let _ = done_tx.send(true);
                return Err(ScopeError::launch_failed(run_id.to_string(), message));
            }
        };

        let snapshot = {
            let mut run = run.lock();
            run.status = RunStatus::Running;
            run.os_pid = child.id();
            run.clone()
        };
        if let Err(e) = self.inner.store.save_run(&snapshot) {
            log::warn!("Failed to persist run {}: {}", run_id, e);
        }

        tokio::spawn(supervise(self.inner.clone(), run_id, run, child, kill, done_tx));
        Ok(run_id)
    }

    /// Kill a running run and wait until it is finalized.
    ///
    /// Returns `Ok(false)` if the run had already ended.
    pub async fn stop(&self, run_id: RunId) -> ScopeResult<bool> {
        let (kill, active) = {
            let runs = self.inner.runs.read();
            let slot = runs
                .get(&run_id)
                .ok_or_else(|| ScopeError::not_found(format!("run {}", run_id)))?;
            let active = !slot.run.lock().status.is_terminal();
            (slot.kill.clone(), active)
        };
        if !active {
            return Ok(false);
        }

        log::info!("Stopping run {}", run_id);
        kill.notify_one();
        let run = self.wait(run_id).await?;
        Ok(run.status == RunStatus::Killed)
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait(&self, run_id: RunId) -> ScopeResult<Run> {
        let done = self
            .inner
            .runs
            .read()
            .get(&run_id)
            .map(|slot| slot.done.clone());
        // Ended runs may have been evicted to the store
        let Some(mut done) = done else {
            return self.inner.store.load_run(run_id);
        };
        loop {
            let finished = *done.borrow_and_update();
            if finished || done.changed().await.is_err() {
                break;
            }
        }
        self.find(run_id)
    }

    /// Snapshot of a run started by this supervisor
    pub fn run(&self, run_id: RunId) -> Option<Run> {
        self.inner
            .runs
            .read()
            .get(&run_id)
            .map(|slot| slot.run.lock().clone())
    }

    /// Runs started by this supervisor, newest first
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .inner
            .runs
            .read()
            .values()
            .map(|slot| slot.run.lock().clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .runs
            .read()
            .values()
            .filter(|slot| slot.run.lock().is_running())
            .count()
    }

    /// Run record from memory, falling back to the store
    pub fn find(&self, run_id: RunId) -> ScopeResult<Run> {
        match self.run(run_id) {
            Some(run) => Ok(run),
            None => self.inner.store.load_run(run_id),
        }
    }

    /// Make sure the run's events are in the log, loading them from the
    /// store for runs recorded by an earlier session
    pub fn ensure_loaded(&self, run_id: RunId) -> ScopeResult<()> {
        if self.inner.log.contains(run_id) {
            return Ok(());
        }
        let events = self.inner.store.load_events(run_id)?;
        let count = self.inner.log.load(run_id, events)?;
        log::debug!("Loaded {} stored events for run {}", count, run_id);
        Ok(())
    }

    /// Remove an ended run from memory and from the store
    pub fn delete(&self, run_id: RunId) -> ScopeResult<()> {
        let in_memory = {
            let mut runs = self.inner.runs.write();
            let active = runs
                .get(&run_id)
                .map(|slot| !slot.run.lock().status.is_terminal());
            match active {
                Some(true) => return Err(ScopeError::RunActive(run_id.to_string())),
                Some(false) => runs.remove(&run_id).is_some(),
                None => false,
            }
        };
        self.inner.log.remove(run_id);

        match self.inner.store.delete_run(run_id) {
            Err(e) if e.is_not_found() && in_memory => Ok(()),
            result => result,
        }
    }

    /// Kill every running run
    pub async fn shutdown(&self) {
        let running: Vec<RunId> = self
            .runs()
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.run_id)
            .collect();
        for run_id in running {
            if let Err(e) = self.stop(run_id).await {
                log::warn!("Failed to stop run {}: {}", run_id, e);
            }
        }
    }
}

impl Inner {
    /// Drop the oldest ended runs beyond `retain_finished_runs` from memory.
    /// Only runs whose record is in the store are evicted.
    fn evict_finished(&self) {
        let keep = self.config.retain_finished_runs;
        if keep == 0 {
            return;
        }
        let mut runs = self.runs.write();
        let mut ended: Vec<(DateTime<Utc>, RunId)> = runs
            .iter()
            .filter_map(|(run_id, slot)| {
                let run = slot.run.lock();
                run.status
                    .is_terminal()
                    .then(|| (run.finished_at.unwrap_or(run.started_at), *run_id))
            })
            .collect();
        if ended.len() <= keep {
            return;
        }
        ended.sort();
        let excess = ended.len() - keep;
        for (_, run_id) in ended.into_iter().take(excess) {
            if !self.store.exists(run_id) {
                continue;
            }
            runs.remove(&run_id);
            self.log.remove(run_id);
            log::debug!("Evicted run {} from memory", run_id);
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    run_id: RunId,
    run: Arc<Mutex<Run>>,
    mut child: Child,
    kill: Arc<Notify>,
    done: watch::Sender<bool>,
) {
    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(ingest_stdout(inner.clone(), run_id, run.clone(), stdout))
    });
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(forward_stderr(inner.clone(), run_id, stderr)));

    let (status, killed) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                log::warn!("Failed to signal run {}: {}", run_id, e);
            }
            (child.wait().await, true)
        }
    };

    // Pipes close once the process is gone; drain what it wrote. A killed
    // run's grandchildren may still hold them open.
    let mut readers: Vec<JoinHandle<()>> = stdout_task.into_iter().chain(stderr_task).collect();
    let drain = futures::future::join_all(readers.iter_mut());
    if killed {
        if tokio::time::timeout(KILL_DRAIN_TIMEOUT, drain).await.is_err() {
            log::debug!("Output of killed run {} still open, abandoning it", run_id);
            for reader in &readers {
                reader.abort();
            }
        }
    } else {
        drain.await;
    }

    let exit_code = status.as_ref().ok().and_then(|s| s.code());
    let snapshot = {
        let mut run = run.lock();
        if killed {
            run.finish(RunStatus::Killed, exit_code);
        } else if matches!(&status, Ok(s) if s.success()) {
            run.finish(RunStatus::Finished, exit_code);
        } else {
            if let Err(e) = &status {
                log::warn!("Lost track of run {}: {}", run_id, e);
            }
            run.finish(RunStatus::Error, exit_code);
            run.failure = Some(FailureReason::Crashed {
                exit_code,
                summary_seen: run.summary.is_some(),
            });
        }
        run.clone()
    };

    inner.log.seal(run_id);
    if let Err(e) = inner.store.save_run(&snapshot) {
        log::warn!("Failed to persist run {}: {}", run_id, e);
    }
    log::info!(
        "Run {} {} after {} events (exit code {:?})",
        run_id,
        snapshot.status,
        snapshot.event_count,
        exit_code
    );

    let message = if snapshot.status == RunStatus::Killed {
        LiveMessage::RunKilled { run_id }
    } else {
        LiveMessage::RunFinished {
            run_id,
            status: snapshot.status,
            exit_code,
            failure: snapshot.failure.clone(),
        }
    };
    inner.broadcaster.publish(message);
    inner.evict_finished();
    let _ = done.send(true);
}

/// Next line of `reader` without its line ending, or `None` at end of
/// stream. Bytes that are not UTF-8 are replaced, never rejected.
async fn next_line_lossy<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn ingest_stdout(
    inner: Arc<Inner>,
    run_id: RunId,
    run: Arc<Mutex<Run>>,
    stdout: impl AsyncRead + Unpin,
) {
    let mut writer = match inner.store.event_writer(run_id) {
        Ok(writer) => Some(writer),
        Err(e) => {
            log::warn!("Events of run {} will not be persisted: {}", run_id, e);
            None
        }
    };

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        let line = match next_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Stopped reading output of run {}: {}", run_id, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        // Only a sealed log refuses appends; nothing later could land
        if let Err(e) = record(&inner, run_id, &run, normalize(line), &mut writer) {
            log::warn!("Dropped output of run {}: {}", run_id, e);
            break;
        }
    }

    if let Some(writer) = writer.as_mut() {
        if let Err(e) = writer.flush() {
            log::warn!("Failed to flush events of run {}: {}", run_id, e);
        }
    }
}

/// Append to the log and update the run record. A store write failure
/// stops persistence for the run but not ingestion.
fn record(
    inner: &Inner,
    run_id: RunId,
    run: &Mutex<Run>,
    event: SchedulerEvent,
    writer: &mut Option<EventWriter>,
) -> ScopeResult<()> {
    let mut stored = event.clone();
    stored.run_id = run_id;
    stored.sequence = inner.log.append(run_id, event)?;

    {
        let mut run = run.lock();
        run.event_count += 1;
        track_cpu(&mut run, &stored);
        if stored.kind == EventKind::Summary {
            run.summary = Some(stored.clone());
        }
    }

    if let Some(w) = writer.as_mut() {
        if let Err(e) = w.write(&stored) {
            log::warn!(
                "Failed to persist events of run {}, keeping them in memory only: {}",
                run_id,
                e
            );
            *writer = None;
        }
    }
    Ok(())
}

/// Keep the run's "on CPU" field in step with dispatch and release events
fn track_cpu(run: &mut Run, event: &SchedulerEvent) {
    if event.kind.is_dispatch() {
        run.on_cpu = Some(event.pid.unwrap_or(Pid::Idle));
    } else if event.kind.is_release() && (event.pid.is_none() || event.pid == run.on_cpu) {
        run.on_cpu = Some(Pid::Idle);
    }
}

async fn forward_stderr(inner: Arc<Inner>, run_id: RunId, stderr: impl AsyncRead + Unpin) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        let line = match next_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::debug!("Stopped reading stderr of run {}: {}", run_id, e);
                break;
            }
        };
        if let Err(e) = inner.store.append_stderr(run_id, &line) {
            log::debug!("Failed to store stderr of run {}: {}", run_id, e);
        }
        inner
            .broadcaster
            .publish(LiveMessage::Stderr { run_id, line });
    }
}
