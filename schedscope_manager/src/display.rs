//! Terminal rendering: event lines, Gantt strip, metrics table

use colored::*;
use schedscope_core::{
    EventKind, MetricsReport, Pid, Run, RunStatus, SchedulerEvent, Timeline,
};

/// Widest Gantt strip before ticks are bucketed
pub const MAX_GANTT_WIDTH: u64 = 100;

/// Single-character label for a pid on the Gantt strip
pub fn pid_label(pid: Pid) -> char {
    match pid {
        Pid::Idle => '.',
        Pid::Process(p) => std::char::from_digit((p % 36) as u32, 36).unwrap_or('?'),
    }
}

fn paint(label: char, pid: Pid) -> ColoredString {
    let text = label.to_string();
    match pid {
        Pid::Idle => text.dimmed(),
        Pid::Process(p) => match p % 6 {
            0 => text.cyan(),
            1 => text.green(),
            2 => text.yellow(),
            3 => text.magenta(),
            4 => text.blue(),
            _ => text.red(),
        },
    }
}

/// One cell per bucket of `scale` ticks; a cell shows whoever held the
/// CPU at the bucket's first tick. Ticks before the first segment are
/// blank.
pub fn gantt_cells(timeline: &Timeline, scale: u64) -> Vec<Option<Pid>> {
    let scale = scale.max(1);
    let total = timeline.stats.total_time;
    let width = total.div_ceil(scale);
    (0..width)
        .map(|cell| timeline.segment_at(cell * scale).map(|s| s.pid))
        .collect()
}

/// Ticks per cell so the strip fits `MAX_GANTT_WIDTH`
pub fn gantt_scale(timeline: &Timeline) -> u64 {
    timeline.stats.total_time.div_ceil(MAX_GANTT_WIDTH).max(1)
}

pub fn render_gantt(timeline: &Timeline) -> String {
    if timeline.is_empty() {
        return format!("  {}", "(no CPU activity)".dimmed());
    }
    let scale = gantt_scale(timeline);
    let strip: String = gantt_cells(timeline, scale)
        .into_iter()
        .map(|cell| match cell {
            Some(pid) => paint(pid_label(pid), pid).to_string(),
            None => " ".to_string(),
        })
        .collect();

    let mut out = format!("  |{}| t={}", strip, timeline.stats.total_time);
    if scale > 1 {
        out.push_str(&format!(" ({} ticks per cell)", scale).dimmed().to_string());
    }
    out.push_str(&format!(
        "\n  CPU {:.1}%  idle {}  switches {}",
        timeline.stats.utilization_percent(),
        timeline.stats.idle_time,
        timeline.stats.context_switches
    ));
    out
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn render_metrics(report: &MetricsReport) -> String {
    let mut out = format!(
        "  {:>5} {:>7} {:>6} {:>6} {:>7} {:>10} {:>8}\n",
        "PID", "Arrival", "Burst", "Start", "Finish", "Turnaround", "Waiting"
    )
    .bold()
    .to_string();

    for p in report.processes.values() {
        let finish = match p.finish_time {
            Some(t) => t.to_string().normal(),
            None => "running".yellow(),
        };
        out.push_str(&format!(
            "  {:>5} {:>7} {:>6} {:>6} {:>7} {:>10} {:>8}\n",
            p.pid,
            p.arrival,
            p.burst_accumulated,
            opt(p.start_time),
            finish,
            p.turnaround,
            p.waiting
        ));
    }

    let agg = &report.aggregates;
    out.push_str(&format!(
        "  {} waiting {:.2}  turnaround {:.2}  response {:.2}  ({} of {} finished)",
        "avg".bold(),
        agg.all.waiting,
        agg.all.turnaround,
        agg.all.response,
        agg.count_finished,
        agg.count_total
    ));
    out
}

pub fn render_event(event: &SchedulerEvent) -> String {
    let tick = opt(event.tick);
    let pid = event.pid.map(|p| p.to_string()).unwrap_or_default();
    let kind = match event.kind {
        EventKind::JobArrived => event.kind.as_str().blue(),
        EventKind::JobStarted | EventKind::JobResumed => event.kind.as_str().green(),
        EventKind::JobPreempted => event.kind.as_str().yellow(),
        EventKind::JobFinished => event.kind.as_str().cyan(),
        EventKind::StarvationWarning => event.kind.as_str().red(),
        EventKind::Raw => {
            return format!(
                "{:>5} {}",
                event.sequence.to_string().dimmed(),
                event.raw.as_deref().unwrap_or_default().dimmed()
            )
        }
        _ => event.kind.as_str().normal(),
    };
    format!(
        "{:>5} t={:<5} {:<18} {}",
        event.sequence.to_string().dimmed(),
        tick,
        kind,
        pid
    )
}

pub fn render_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().dimmed(),
        RunStatus::Running => status.as_str().blue(),
        RunStatus::Finished => status.as_str().green(),
        RunStatus::Error => status.as_str().red(),
        RunStatus::Killed => status.as_str().yellow(),
    }
}

pub fn render_run_line(run: &Run) -> String {
    let duration = run
        .duration_secs()
        .map(|d| format!("{:.1}s", d))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {:<8} {:<10} {}  {:>7}  {:>6} events",
        run.run_id.to_string().bright_blue(),
        run.algorithm,
        render_status(run.status),
        run.started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S"),
        duration,
        run.event_count
    )
}
