//! Derived views over an event sequence
//!
//! Both reconstructors are pure functions of their input. They fold
//! events in `sequence` order and never fail: anomalies such as a release
//! without a matching dispatch are skipped. Ticks reported by the
//! scheduler are clamped to a running maximum so a tick that moves
//! backwards cannot produce overlapping intervals.

pub mod metrics;
pub mod report;
pub mod timeline;

pub use metrics::{reconstruct_metrics, Aggregates, Averages, MetricsReport, ProcessMetrics};
pub use report::{export_report, ReportFormat, SchedulerSummary};
pub use timeline::{reconstruct_timeline, Segment, Timeline, TimelineStats};

use crate::event::SchedulerEvent;
use std::borrow::Borrow;

/// Events sorted by sequence. Stable, so unsequenced input keeps its order.
pub(crate) fn in_sequence_order<E: Borrow<SchedulerEvent>>(events: &[E]) -> Vec<&SchedulerEvent> {
    let mut ordered: Vec<&SchedulerEvent> = events.iter().map(|e| e.borrow()).collect();
    ordered.sort_by_key(|e| e.sequence);
    ordered
}

/// Monotone view of the scheduler's tick
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TickClock {
    last: Option<u64>,
}

impl TickClock {
    /// Effective tick of an event: never earlier than anything seen before.
    /// Events without a tick take the latest tick seen.
    pub fn observe(&mut self, tick: Option<u64>) -> Option<u64> {
        if let Some(t) = tick {
            let t = self.last.map_or(t, |last| last.max(t));
            self.last = Some(t);
        }
        self.last
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}
