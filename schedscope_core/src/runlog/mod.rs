//! Append-only, per-run event log
//!
//! The log is the single source of truth for a run. The supervisor is
//! the only writer for a given run; any number of readers may take
//! snapshots concurrently. Listeners (the live broadcaster) are notified
//! of each append while the run's write lock is held, so they observe
//! events in sequence order.

pub mod store;

use crate::error::{ScopeError, ScopeResult};
use crate::event::{normalize, RawEvent, RunId, SchedulerEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Receives every event appended to any run
pub trait AppendListener: Send + Sync {
    fn on_append(&self, event: &Arc<SchedulerEvent>);
}

#[derive(Default)]
struct RunEntries {
    events: Vec<Arc<SchedulerEvent>>,
    sealed: bool,
}

/// Shared event log for all runs
#[derive(Default)]
pub struct RunLog {
    runs: RwLock<HashMap<RunId, Arc<RwLock<RunEntries>>>>,
    listeners: RwLock<Vec<Arc<dyn AppendListener>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn AppendListener>) {
        self.listeners.write().push(listener);
    }

    /// Register an empty log for a run. No-op if it already exists.
    pub fn create(&self, run_id: RunId) {
        self.runs.write().entry(run_id).or_default();
    }

    fn entries(&self, run_id: RunId) -> Option<Arc<RwLock<RunEntries>>> {
        self.runs.read().get(&run_id).cloned()
    }

    fn entries_or_create(&self, run_id: RunId) -> Arc<RwLock<RunEntries>> {
        if let Some(entries) = self.entries(run_id) {
            return entries;
        }
        self.runs.write().entry(run_id).or_default().clone()
    }

    /// Append an event, returning its sequence number.
    ///
    /// Sequence numbers start at 1 and have no gaps. `run_id` and
    /// `sequence` on the incoming event are overwritten.
    pub fn append(&self, run_id: RunId, mut event: SchedulerEvent) -> ScopeResult<u64> {
        let entries = self.entries_or_create(run_id);
        let mut entries = entries.write();
        if entries.sealed {
            return Err(ScopeError::RunSealed(run_id.to_string()));
        }

        let sequence = entries.events.len() as u64 + 1;
        event.run_id = run_id;
        event.sequence = sequence;
        let event = Arc::new(event);
        entries.events.push(event.clone());

        for listener in self.listeners.read().iter() {
            listener.on_append(&event);
        }
        Ok(sequence)
    }

    /// Normalize a raw payload and append it
    pub fn append_raw(&self, run_id: RunId, raw: impl Into<RawEvent>) -> ScopeResult<u64> {
        self.append(run_id, normalize(raw))
    }

    /// Snapshot of the events with `sequence > after_sequence`.
    ///
    /// Passing 0 returns the whole log. Events appended while the call
    /// runs are not included.
    pub fn read(&self, run_id: RunId, after_sequence: u64) -> ScopeResult<Vec<Arc<SchedulerEvent>>> {
        let entries = self
            .entries(run_id)
            .ok_or_else(|| ScopeError::not_found(format!("run {}", run_id)))?;
        let entries = entries.read();
        let start = (after_sequence as usize).min(entries.events.len());
        Ok(entries.events[start..].to_vec())
    }

    /// Close the log. Later appends fail with [`ScopeError::RunSealed`].
    pub fn seal(&self, run_id: RunId) {
        if let Some(entries) = self.entries(run_id) {
            entries.write().sealed = true;
        }
    }

    pub fn is_sealed(&self, run_id: RunId) -> bool {
        self.entries(run_id)
            .map(|e| e.read().sealed)
            .unwrap_or(false)
    }

    pub fn contains(&self, run_id: RunId) -> bool {
        self.runs.read().contains_key(&run_id)
    }

    pub fn len(&self, run_id: RunId) -> usize {
        self.entries(run_id).map(|e| e.read().events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, run_id: RunId) -> bool {
        self.len(run_id) == 0
    }

    pub fn last_sequence(&self, run_id: RunId) -> u64 {
        self.len(run_id) as u64
    }

    /// Largest tick seen so far in the run
    pub fn max_tick(&self, run_id: RunId) -> Option<u64> {
        let entries = self.entries(run_id)?;
        let entries = entries.read();
        entries.events.iter().filter_map(|e| e.tick).max()
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.read().keys().copied().collect()
    }

    pub fn remove(&self, run_id: RunId) -> bool {
        self.runs.write().remove(&run_id).is_some()
    }

    /// Restore a stored run for replay.
    ///
    /// Events are ordered by their stored sequence, duplicates of the same
    /// sequence are dropped, and sequences are renumbered without gaps.
    /// The restored log is sealed. Listeners are not notified.
    ///
    /// Loading a run that is already sealed in the log keeps the existing
    /// events and returns their count. A live run with events is refused.
    pub fn load(&self, run_id: RunId, mut events: Vec<SchedulerEvent>) -> ScopeResult<usize> {
        let mut runs = self.runs.write();
        if let Some(existing) = runs.get(&run_id) {
            let existing = existing.read();
            if existing.sealed {
                return Ok(existing.events.len());
            }
            if !existing.events.is_empty() {
                return Err(ScopeError::invalid_input(format!(
                    "run {} already has events in the log",
                    run_id
                )));
            }
        }

        events.sort_by_key(|e| e.sequence);
        events.dedup_by_key(|e| e.sequence);

        let restored: Vec<Arc<SchedulerEvent>> = events
            .into_iter()
            .enumerate()
            .map(|(i, mut event)| {
                event.run_id = run_id;
                event.sequence = i as u64 + 1;
                Arc::new(event)
            })
            .collect();
        let count = restored.len();

        runs.insert(
            run_id,
            Arc::new(RwLock::new(RunEntries {
                events: restored,
                sealed: true,
            })),
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter(AtomicU64);

    impl AppendListener for Counter {
        fn on_append(&self, event: &Arc<SchedulerEvent>) {
            self.0.store(event.sequence, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_append_assigns_gap_free_sequence() {
        let log = RunLog::new();
        let run = RunId::new();

        assert_eq!(log.append(run, SchedulerEvent::new(EventKind::Tick).at(0)).unwrap(), 1);
        assert_eq!(log.append_raw(run, "garbage").unwrap(), 2);
        assert_eq!(log.append(run, SchedulerEvent::new(EventKind::Tick).at(1)).unwrap(), 3);

        let events = log.read(run, 0).unwrap();
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(events.iter().all(|e| e.run_id == run));
        assert_eq!(events[1].kind, EventKind::Raw);
    }

    #[test]
    fn test_runs_are_independent() {
        let log = RunLog::new();
        let a = RunId::new();
        let b = RunId::new();
        log.append(a, SchedulerEvent::new(EventKind::Tick)).unwrap();
        log.append(b, SchedulerEvent::new(EventKind::Tick)).unwrap();
        log.append(a, SchedulerEvent::new(EventKind::Tick)).unwrap();
        assert_eq!(log.last_sequence(a), 2);
        assert_eq!(log.last_sequence(b), 1);
    }

    #[test]
    fn test_read_is_a_growing_prefix() {
        let log = RunLog::new();
        let run = RunId::new();
        for t in 0..3 {
            log.append(run, SchedulerEvent::new(EventKind::Tick).at(t)).unwrap();
        }
        let early = log.read(run, 0).unwrap();
        for t in 3..6 {
            log.append(run, SchedulerEvent::new(EventKind::Tick).at(t)).unwrap();
        }
        let later = log.read(run, 0).unwrap();
        assert_eq!(early.len(), 3);
        assert_eq!(later.len(), 6);
        assert_eq!(&later[..3], &early[..]);

        let tail = log.read(run, 4).unwrap();
        assert_eq!(tail.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![5, 6]);
        assert!(log.read(run, 99).unwrap().is_empty());
    }

    #[test]
    fn test_read_unknown_run() {
        let log = RunLog::new();
        assert!(log.read(RunId::new(), 0).unwrap_err().is_not_found());

        let run = RunId::new();
        log.create(run);
        assert!(log.read(run, 0).unwrap().is_empty());
    }

    #[test]
    fn test_sealed_log_rejects_appends() {
        let log = RunLog::new();
        let run = RunId::new();
        log.append(run, SchedulerEvent::new(EventKind::Tick)).unwrap();
        log.seal(run);
        assert!(log.is_sealed(run));
        let err = log.append(run, SchedulerEvent::new(EventKind::Tick)).unwrap_err();
        assert!(matches!(err, ScopeError::RunSealed(_)));
        assert_eq!(log.len(run), 1);
    }

    #[test]
    fn test_listener_sees_every_append() {
        let log = RunLog::new();
        let counter = Arc::new(Counter(AtomicU64::new(0)));
        log.add_listener(counter.clone());
        let run = RunId::new();
        for _ in 0..4 {
            log.append(run, SchedulerEvent::new(EventKind::Tick)).unwrap();
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_concurrent_readers_during_append() {
        let log = Arc::new(RunLog::new());
        let run = RunId::new();
        log.create(run);

        let writer = {
            let log = log.clone();
            std::thread::spawn(move || {
                for t in 0..500 {
                    log.append(run, SchedulerEvent::new(EventKind::Tick).at(t)).unwrap();
                }
            })
        };

        let mut last_len = 0;
        while last_len < 500 {
            let snapshot = log.read(run, 0).unwrap();
            assert!(snapshot.len() >= last_len);
            for (i, event) in snapshot.iter().enumerate() {
                assert_eq!(event.sequence, i as u64 + 1);
            }
            last_len = snapshot.len();
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_load_sorts_dedupes_and_seals() {
        let log = RunLog::new();
        let run = RunId::new();
        let mut a = SchedulerEvent::new(EventKind::JobStarted).at(0).with_pid(1);
        a.sequence = 2;
        let mut b = SchedulerEvent::new(EventKind::JobArrived).at(0).with_pid(1);
        b.sequence = 1;
        let mut dup = a.clone();
        dup.kind = EventKind::Tick;
        let mut c = SchedulerEvent::new(EventKind::JobFinished).at(3).with_pid(1);
        c.sequence = 5;

        assert_eq!(log.load(run, vec![a, b, dup, c]).unwrap(), 3);
        let events = log.read(run, 0).unwrap();
        let kinds: Vec<&EventKind> = events.iter().map(|e| &e.kind).collect();
        assert_eq!(
            kinds,
            vec![&EventKind::JobArrived, &EventKind::JobStarted, &EventKind::JobFinished]
        );
        assert_eq!(events[2].sequence, 3);
        assert!(log.is_sealed(run));
        assert_eq!(log.max_tick(run), Some(3));

        // Already restored: the second load keeps what is there
        assert_eq!(log.load(run, Vec::new()).unwrap(), 3);
        assert_eq!(log.read(run, 0).unwrap().len(), 3);

        let live = RunId::new();
        log.create(live);
        log.append(live, SchedulerEvent::new(EventKind::Tick).at(0)).unwrap();
        assert!(log.load(live, Vec::new()).unwrap_err().is_invalid_input());
    }
}
