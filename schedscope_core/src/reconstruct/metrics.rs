//! Per-process performance metrics

use super::{in_sequence_order, TickClock};
use crate::event::{EventKind, Pid, SchedulerEvent};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub pid: u64,
    pub arrival: u64,
    pub start_time: Option<u64>,
    pub finish_time: Option<u64>,
    /// CPU time observed so far
    pub burst_accumulated: u64,
    /// Burst declared by the scheduler, if it reported one
    pub declared_burst: Option<i64>,
    pub priority: Option<i64>,
    pub waiting: u64,
    pub turnaround: u64,
    pub response: Option<u64>,
}

impl ProcessMetrics {
    pub fn is_finished(&self) -> bool {
        self.finish_time.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub count: usize,
    pub waiting: f64,
    pub turnaround: f64,
    /// Mean over processes that have started at least once
    pub response: f64,
    pub response_count: usize,
}

impl Averages {
    fn over<'a>(processes: impl Iterator<Item = &'a ProcessMetrics>) -> Self {
        let mut avg = Averages::default();
        let (mut waiting, mut turnaround, mut response) = (0u64, 0u64, 0u64);
        for p in processes {
            avg.count += 1;
            waiting += p.waiting;
            turnaround += p.turnaround;
            if let Some(r) = p.response {
                avg.response_count += 1;
                response += r;
            }
        }
        if avg.count > 0 {
            avg.waiting = waiting as f64 / avg.count as f64;
            avg.turnaround = turnaround as f64 / avg.count as f64;
        }
        if avg.response_count > 0 {
            avg.response = response as f64 / avg.response_count as f64;
        }
        avg
    }
}

/// Averages over all known processes and over finished ones only.
/// Early readings include unfinished processes and are skewed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregates {
    pub count_total: usize,
    pub count_finished: usize,
    pub all: Averages,
    pub finished: Averages,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub processes: BTreeMap<u64, ProcessMetrics>,
    /// Last observed tick; unfinished turnaround is measured up to here
    pub now: u64,
    pub aggregates: Aggregates,
}

impl MetricsReport {
    pub fn get(&self, pid: u64) -> Option<&ProcessMetrics> {
        self.processes.get(&pid)
    }
}

#[derive(Default)]
struct Tracker {
    arrival: Option<u64>,
    start: Option<u64>,
    finish: Option<u64>,
    running_since: Option<u64>,
    burst: u64,
    declared_burst: Option<i64>,
    priority: Option<i64>,
}

impl Tracker {
    fn arrived_at(&mut self, tick: u64) {
        self.arrival = Some(self.arrival.map_or(tick, |a| a.min(tick)));
    }

    fn close(&mut self, at: u64) -> bool {
        match self.running_since.take() {
            Some(since) => {
                self.burst += at.saturating_sub(since);
                true
            }
            None => false,
        }
    }
}

/// Fold events into per-process metrics.
///
/// A release with no open interval is skipped. Intervals still open at
/// the end are closed at the last observed tick without a finish time.
pub fn reconstruct_metrics<E: Borrow<SchedulerEvent>>(events: &[E]) -> MetricsReport {
    let mut clock = TickClock::default();
    let mut trackers: BTreeMap<u64, Tracker> = BTreeMap::new();

    for event in in_sequence_order(events) {
        let now = clock.observe(event.tick);
        let Some(pid) = event.pid.and_then(|p| match p {
            Pid::Process(p) => Some(p),
            Pid::Idle => None,
        }) else {
            continue;
        };

        let tracker = trackers.entry(pid).or_default();
        if let Some(arrival) = event.arrival.and_then(|a| u64::try_from(a).ok()) {
            tracker.arrived_at(arrival);
        }
        if event.burst.is_some() {
            tracker.declared_burst = event.burst;
        }
        if event.priority.is_some() {
            tracker.priority = event.priority;
        }

        let Some(at) = now.filter(|_| event.tick.is_some()) else {
            continue;
        };
        // First mention; arrived/started events may still lower it
        if tracker.arrival.is_none() {
            tracker.arrival = Some(at);
        }
        match event.kind {
            EventKind::JobArrived => tracker.arrived_at(at),
            EventKind::JobStarted | EventKind::JobResumed => {
                tracker.arrived_at(at);
                if tracker.running_since.is_none() {
                    tracker.running_since = Some(at);
                }
                if tracker.start.is_none() {
                    tracker.start = Some(at);
                }
            }
            EventKind::JobPreempted => {
                tracker.close(at);
            }
            EventKind::JobFinished => {
                tracker.close(at);
                if tracker.finish.is_none() {
                    tracker.finish = Some(at);
                }
            }
            _ => {}
        }
    }

    let now = clock.last().unwrap_or(0);
    let processes: BTreeMap<u64, ProcessMetrics> = trackers
        .into_iter()
        .map(|(pid, mut t)| {
            t.close(now);
            let arrival = t.arrival.unwrap_or(0);
            let turnaround = t.finish.unwrap_or(now).saturating_sub(arrival);
            let metrics = ProcessMetrics {
                pid,
                arrival,
                start_time: t.start,
                finish_time: t.finish,
                burst_accumulated: t.burst,
                declared_burst: t.declared_burst,
                priority: t.priority,
                waiting: turnaround.saturating_sub(t.burst),
                turnaround,
                response: t.start.map(|s| s.saturating_sub(arrival)),
            };
            (pid, metrics)
        })
        .collect();

    let aggregates = Aggregates {
        count_total: processes.len(),
        count_finished: processes.values().filter(|p| p.is_finished()).count(),
        all: Averages::over(processes.values()),
        finished: Averages::over(processes.values().filter(|p| p.is_finished())),
    };

    MetricsReport {
        processes,
        now,
        aggregates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, tick: u64, pid: u64) -> SchedulerEvent {
        SchedulerEvent::new(kind).at(tick).with_pid(pid)
    }

    #[test]
    fn test_single_process_runs_to_completion() {
        let events = vec![
            ev(EventKind::JobArrived, 0, 1),
            ev(EventKind::JobStarted, 0, 1),
            ev(EventKind::GanttSlice, 2, 1),
            ev(EventKind::JobFinished, 5, 1),
        ];
        let report = reconstruct_metrics(&events);
        let p = report.get(1).unwrap();
        assert_eq!(p.arrival, 0);
        assert_eq!(p.start_time, Some(0));
        assert_eq!(p.finish_time, Some(5));
        assert_eq!(p.burst_accumulated, 5);
        assert_eq!(p.waiting, 0);
        assert_eq!(p.turnaround, 5);
        assert_eq!(p.response, Some(0));
    }

    #[test]
    fn test_two_processes_with_preemption() {
        let events = vec![
            ev(EventKind::JobArrived, 0, 1),
            ev(EventKind::JobStarted, 0, 1),
            ev(EventKind::JobArrived, 1, 2),
            ev(EventKind::JobPreempted, 3, 1),
            ev(EventKind::JobStarted, 3, 2),
            ev(EventKind::JobFinished, 5, 2),
            ev(EventKind::JobResumed, 5, 1),
            ev(EventKind::JobFinished, 7, 1),
        ];
        let report = reconstruct_metrics(&events);

        let p1 = report.get(1).unwrap();
        assert_eq!(p1.burst_accumulated, 5);
        assert_eq!(p1.turnaround, 7);
        assert_eq!(p1.waiting, 2);
        assert_eq!(p1.response, Some(0));

        let p2 = report.get(2).unwrap();
        assert_eq!(p2.arrival, 1);
        assert_eq!(p2.burst_accumulated, 2);
        assert_eq!(p2.turnaround, 4);
        assert_eq!(p2.waiting, 2);
        assert_eq!(p2.response, Some(2));

        assert_eq!(report.aggregates.count_total, 2);
        assert_eq!(report.aggregates.count_finished, 2);
        assert_eq!(report.aggregates.all.waiting, 2.0);
        assert_eq!(report.aggregates.all.turnaround, 5.5);
        assert_eq!(report.aggregates.all.response, 1.0);
    }

    #[test]
    fn test_earliest_arrival_wins() {
        let events = vec![
            ev(EventKind::StarvationWarning, 4, 3),
            ev(EventKind::JobArrived, 2, 3),
            ev(EventKind::JobStarted, 6, 3).with_arrival(1),
        ];
        let report = reconstruct_metrics(&events);
        assert_eq!(report.get(3).unwrap().arrival, 1);
    }

    #[test]
    fn test_unfinished_process_measured_to_now() {
        let events = vec![
            ev(EventKind::JobArrived, 0, 1),
            ev(EventKind::JobArrived, 0, 2),
            ev(EventKind::JobStarted, 1, 1),
            SchedulerEvent::new(EventKind::Tick).at(6),
        ];
        let report = reconstruct_metrics(&events);
        assert_eq!(report.now, 6);

        let p1 = report.get(1).unwrap();
        assert_eq!(p1.finish_time, None);
        assert_eq!(p1.burst_accumulated, 5);
        assert_eq!(p1.turnaround, 6);
        assert_eq!(p1.waiting, 1);

        let p2 = report.get(2).unwrap();
        assert_eq!(p2.start_time, None);
        assert_eq!(p2.response, None);
        assert_eq!(p2.waiting, 6);

        assert_eq!(report.aggregates.count_finished, 0);
        assert_eq!(report.aggregates.finished, Averages::default());
        assert_eq!(report.aggregates.all.response_count, 1);
        assert_eq!(report.aggregates.all.response, 1.0);
    }

    #[test]
    fn test_release_without_open_interval_is_skipped() {
        let events = vec![
            ev(EventKind::JobArrived, 0, 1),
            ev(EventKind::JobPreempted, 2, 1),
            ev(EventKind::JobFinished, 4, 1),
        ];
        let report = reconstruct_metrics(&events);
        let p = report.get(1).unwrap();
        assert_eq!(p.burst_accumulated, 0);
        assert_eq!(p.finish_time, Some(4));
        assert_eq!(p.turnaround, 4);
        assert_eq!(p.waiting, 4);
    }

    #[test]
    fn test_duplicate_start_keeps_earliest_open() {
        let events = vec![
            ev(EventKind::JobStarted, 0, 1),
            ev(EventKind::JobResumed, 2, 1),
            ev(EventKind::JobFinished, 4, 1),
        ];
        let report = reconstruct_metrics(&events);
        assert_eq!(report.get(1).unwrap().burst_accumulated, 4);
    }

    #[test]
    fn test_idle_and_informational_events_ignored() {
        let events = vec![
            SchedulerEvent::new(EventKind::ContextSwitch).at(0).idle(),
            SchedulerEvent::raw("hello"),
            SchedulerEvent::new(EventKind::Summary),
        ];
        let report = reconstruct_metrics(&events);
        assert!(report.processes.is_empty());
        assert_eq!(report.aggregates, Aggregates::default());
    }

    #[test]
    fn test_payload_fields_recorded() {
        let events = vec![ev(EventKind::JobArrived, 0, 4).with_burst(7).with_priority(2)];
        let report = reconstruct_metrics(&events);
        let p = report.get(4).unwrap();
        assert_eq!(p.declared_burst, Some(7));
        assert_eq!(p.priority, Some(2));
    }

    #[test]
    fn test_reconstruction_is_pure() {
        let events = vec![
            ev(EventKind::JobStarted, 0, 1),
            ev(EventKind::JobPreempted, 2, 1),
            ev(EventKind::JobStarted, 2, 2),
        ];
        assert_eq!(reconstruct_metrics(&events), reconstruct_metrics(&events));
    }
}
