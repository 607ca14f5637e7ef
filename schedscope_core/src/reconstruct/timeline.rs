//! Execution timeline (Gantt) reconstruction

use super::{in_sequence_order, TickClock};
use crate::event::{EventKind, Pid, SchedulerEvent};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Maximal interval during which one process (or idle) held the CPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub pid: Pid,
    pub start_tick: u64,
    /// Exclusive
    pub end_tick: u64,
    pub priority: Option<i64>,
    pub remaining_at_end: Option<i64>,
}

impl Segment {
    pub fn duration(&self) -> u64 {
        self.end_tick - self.start_tick
    }

    pub fn contains(&self, tick: u64) -> bool {
        tick >= self.start_tick && tick < self.end_tick
    }

    pub fn is_idle(&self) -> bool {
        self.pid.is_idle()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineStats {
    pub total_time: u64,
    pub idle_time: u64,
    pub busy_time: u64,
    /// Busy share of `total_time`, in `[0, 1]`
    pub cpu_utilization: f64,
    pub context_switches: u64,
}

impl TimelineStats {
    fn from_segments(segments: &[Segment]) -> Self {
        let total_time = segments.iter().map(|s| s.end_tick).max().unwrap_or(0);
        let idle_time: u64 = segments.iter().filter(|s| s.is_idle()).map(|s| s.duration()).sum();
        let busy_time = total_time.saturating_sub(idle_time);
        let cpu_utilization = if total_time == 0 {
            0.0
        } else {
            busy_time as f64 / total_time as f64
        };
        Self {
            total_time,
            idle_time,
            busy_time,
            cpu_utilization,
            context_switches: segments.len().saturating_sub(1) as u64,
        }
    }

    pub fn utilization_percent(&self) -> f64 {
        self.cpu_utilization * 100.0
    }
}

/// Ordered, non-overlapping segments plus their statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub segments: Vec<Segment>,
    pub stats: TimelineStats,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment covering `tick`, if any
    pub fn segment_at(&self, tick: u64) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(tick))
    }

    /// Segments overlapping `[start, end)`
    pub fn segments_in_range(&self, start: u64, end: u64) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| s.end_tick > start && s.start_tick < end)
            .collect()
    }

    pub fn group_by_pid(&self) -> BTreeMap<Pid, Vec<&Segment>> {
        let mut groups: BTreeMap<Pid, Vec<&Segment>> = BTreeMap::new();
        for segment in &self.segments {
            groups.entry(segment.pid).or_default().push(segment);
        }
        groups
    }
}

/// Segment still being built
struct Open {
    pid: Pid,
    start: u64,
    end: u64,
    priority: Option<i64>,
    remaining: Option<i64>,
}

#[derive(Default)]
struct Builder {
    current: Option<Open>,
    segments: Vec<Segment>,
    /// End of the last closed segment; nothing may start before it
    frontier: u64,
}

impl Builder {
    fn close(&mut self, at: u64) -> Option<u64> {
        let open = self.current.take()?;
        let end = open.end.max(at);
        if end > open.start {
            self.segments.push(Segment {
                pid: open.pid,
                start_tick: open.start,
                end_tick: end,
                priority: open.priority,
                remaining_at_end: open.remaining,
            });
        }
        self.frontier = self.frontier.max(end);
        Some(end)
    }

    fn open(&mut self, pid: Pid, at: u64, priority: Option<i64>, remaining: Option<i64>) {
        let start = at.max(self.frontier);
        self.current = Some(Open {
            pid,
            start,
            end: start,
            priority,
            remaining,
        });
    }

    fn dispatch(&mut self, event: &SchedulerEvent, at: u64) {
        self.close(at);
        match event.pid {
            Some(pid @ Pid::Process(_)) => self.open(pid, at, event.priority, event.remaining),
            _ => self.open(Pid::Idle, at, None, None),
        }
    }

    fn release(&mut self, event: &SchedulerEvent, at: u64) {
        let matches = match (&self.current, event.pid) {
            (Some(open), Some(pid @ Pid::Process(_))) => open.pid == pid,
            (Some(open), _) => !open.pid.is_idle(),
            (None, _) => false,
        };
        if !matches {
            return;
        }
        if let Some(open) = self.current.as_mut() {
            if event.remaining.is_some() {
                open.remaining = event.remaining;
            }
        }
        if let Some(end) = self.close(at) {
            self.open(Pid::Idle, end, None, None);
        }
    }

    fn extend(&mut self, event: &SchedulerEvent, to: u64) {
        if let Some(open) = self.current.as_mut() {
            open.end = open.end.max(to);
            if event.pid.is_none() || event.pid == Some(open.pid) {
                if event.remaining.is_some() {
                    open.remaining = event.remaining;
                }
                if event.priority.is_some() {
                    open.priority = event.priority;
                }
            }
        }
    }

    fn finish(mut self, last_tick: u64) -> Vec<Segment> {
        self.close(last_tick);
        merge_adjacent(self.segments)
    }
}

/// Join neighbours that share a pid and touch at the boundary
fn merge_adjacent(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(prev) if prev.pid == segment.pid && prev.end_tick == segment.start_tick => {
                prev.end_tick = segment.end_tick;
                prev.remaining_at_end = segment.remaining_at_end.or(prev.remaining_at_end);
                if segment.priority.is_some() {
                    prev.priority = segment.priority;
                }
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Fold events into a timeline.
///
/// Events sharing a tick are applied in sequence order, which decides
/// segment boundaries. Time before the first dispatch is not represented;
/// time between a release and the next dispatch is an idle segment.
pub fn reconstruct_timeline<E: Borrow<SchedulerEvent>>(events: &[E]) -> Timeline {
    let mut clock = TickClock::default();
    let mut builder = Builder::default();

    for event in in_sequence_order(events) {
        let now = clock.observe(event.tick);
        let at = now.unwrap_or(0);
        match event.kind {
            EventKind::JobStarted | EventKind::JobResumed | EventKind::ContextSwitch => {
                builder.dispatch(event, at)
            }
            EventKind::JobPreempted | EventKind::JobFinished => builder.release(event, at),
            EventKind::GanttSlice => {
                if event.tick.is_some() {
                    builder.extend(event, at + 1);
                }
            }
            EventKind::Tick => {
                if event.tick.is_some() {
                    builder.extend(event, at);
                }
            }
            _ => {}
        }
    }

    let segments = builder.finish(clock.last().unwrap_or(0));
    let stats = TimelineStats::from_segments(&segments);
    Timeline { segments, stats }
}
