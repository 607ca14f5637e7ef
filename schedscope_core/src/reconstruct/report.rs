//! Report export and the scheduler's own terminal summary

use super::metrics::MetricsReport;
use super::timeline::Timeline;
use crate::error::{ScopeError, ScopeResult};
use crate::event::{EventKind, SchedulerEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ReportFormat::Csv),
            "md" | "markdown" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(ScopeError::invalid_input(format!(
                "unknown report format '{}' (expected csv, markdown or json)",
                other
            ))),
        }
    }
}

const HEADERS: [&str; 8] = [
    "PID",
    "Arrival",
    "Burst",
    "Completion",
    "Waiting",
    "Turnaround",
    "Response",
    "Priority",
];

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Render per-process metrics with an averages row.
///
/// The timeline, when given, adds utilization and switch counts (JSON
/// embeds it whole; CSV and Markdown append a stats line).
pub fn export_report(
    metrics: &MetricsReport,
    timeline: Option<&Timeline>,
    format: ReportFormat,
) -> ScopeResult<String> {
    let averages = &metrics.aggregates.all;
    let rows: Vec<[String; 8]> = metrics
        .processes
        .values()
        .map(|p| {
            [
                p.pid.to_string(),
                p.arrival.to_string(),
                p.burst_accumulated.to_string(),
                opt(p.finish_time),
                p.waiting.to_string(),
                p.turnaround.to_string(),
                opt(p.response),
                opt(p.priority),
            ]
        })
        .collect();

    let mut out = String::new();
    match format {
        ReportFormat::Json => {
            let value = serde_json::json!({
                "processes": metrics.processes.values().collect::<Vec<_>>(),
                "now": metrics.now,
                "aggregates": metrics.aggregates,
                "timeline": timeline,
            });
            out = serde_json::to_string_pretty(&value)?;
        }
        ReportFormat::Csv => {
            let _ = writeln!(out, "{}", HEADERS.join(","));
            for row in &rows {
                let _ = writeln!(out, "{}", row.join(","));
            }
            let _ = writeln!(
                out,
                "AVERAGE,,,,{:.2},{:.2},{:.2},",
                averages.waiting, averages.turnaround, averages.response
            );
            if let Some(timeline) = timeline {
                let _ = writeln!(
                    out,
                    "# utilization={:.2}% idle={} context_switches={}",
                    timeline.stats.utilization_percent(),
                    timeline.stats.idle_time,
                    timeline.stats.context_switches
                );
            }
        }
        ReportFormat::Markdown => {
            let _ = writeln!(out, "| {} |", HEADERS.join(" | "));
            let _ = writeln!(out, "|{}|", vec!["---"; HEADERS.len()].join("|"));
            for row in &rows {
                let _ = writeln!(out, "| {} |", row.join(" | "));
            }
            let _ = writeln!(
                out,
                "| **AVERAGE** | - | - | - | **{:.2}** | **{:.2}** | **{:.2}** | - |",
                averages.waiting, averages.turnaround, averages.response
            );
            if let Some(timeline) = timeline {
                let _ = writeln!(
                    out,
                    "\nCPU utilization: {:.2}%, idle time: {}, context switches: {}",
                    timeline.stats.utilization_percent(),
                    timeline.stats.idle_time,
                    timeline.stats.context_switches
                );
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryProcess {
    pub pid: i64,
    #[serde(default)]
    pub arrival: i64,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub finish: Option<i64>,
    #[serde(default)]
    pub waiting: Option<f64>,
    #[serde(default)]
    pub turnaround: Option<f64>,
    #[serde(default)]
    pub response: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryAverages {
    #[serde(default)]
    pub waiting_time: f64,
    #[serde(default)]
    pub turnaround_time: f64,
    #[serde(default)]
    pub response_time: f64,
}

/// Aggregate printed by the scheduler when it exits cleanly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSummary {
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub ticks: Option<u64>,
    #[serde(default)]
    pub context_switches: Option<u64>,
    #[serde(default)]
    pub processes: Vec<SummaryProcess>,
    #[serde(default)]
    pub averages: SummaryAverages,
}

impl SchedulerSummary {
    /// Parse the payload of a `summary` event
    pub fn from_event(event: &SchedulerEvent) -> Option<Self> {
        if event.kind != EventKind::Summary {
            return None;
        }
        let payload = Value::Object(event.extra.clone());
        match serde_json::from_value(payload) {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::debug!("summary event {} did not parse: {}", event.sequence, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::normalize;
    use crate::reconstruct::{reconstruct_metrics, reconstruct_timeline};

    fn sample() -> Vec<SchedulerEvent> {
        vec![
            SchedulerEvent::new(EventKind::JobStarted).at(0).with_pid(1).with_priority(2),
            SchedulerEvent::new(EventKind::JobArrived).at(1).with_pid(2),
            SchedulerEvent::new(EventKind::JobFinished).at(3).with_pid(1),
            SchedulerEvent::new(EventKind::JobStarted).at(3).with_pid(2),
            SchedulerEvent::new(EventKind::JobFinished).at(5).with_pid(2),
        ]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("latex".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_csv_export() {
        let events = sample();
        let metrics = reconstruct_metrics(&events);
        let timeline = reconstruct_timeline(&events);
        let csv = export_report(&metrics, Some(&timeline), ReportFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "PID,Arrival,Burst,Completion,Waiting,Turnaround,Response,Priority");
        assert_eq!(lines[1], "1,0,3,3,0,3,0,2");
        assert_eq!(lines[2], "2,1,2,5,2,4,2,N/A");
        assert_eq!(lines[3], "AVERAGE,,,,1.00,3.50,1.00,");
        assert!(lines[4].contains("utilization=100.00%"));
    }

    #[test]
    fn test_markdown_export() {
        let metrics = reconstruct_metrics(&sample());
        let md = export_report(&metrics, None, ReportFormat::Markdown).unwrap();
        assert!(md.starts_with("| PID | Arrival |"));
        assert!(md.contains("|---|---|"));
        assert!(md.contains("| **AVERAGE** | - | - | - | **1.00** |"));
    }

    #[test]
    fn test_json_export() {
        let events = sample();
        let metrics = reconstruct_metrics(&events);
        let timeline = reconstruct_timeline(&events);
        let json = export_report(&metrics, Some(&timeline), ReportFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["processes"][1]["pid"], 2);
        assert_eq!(value["aggregates"]["count_finished"], 2);
        assert_eq!(value["timeline"]["stats"]["context_switches"], 1);
    }

    #[test]
    fn test_summary_from_event() {
        let event = normalize(serde_json::json!({
            "algorithm": "FCFS",
            "injected": 0,
            "ticks": 5,
            "context_switches": 1,
            "processes": [
                {"pid": 1, "arrival": 0, "burst": 3, "start": 0, "finish": 3,
                 "waiting": 0, "turnaround": 3, "response": 0}
            ],
            "averages": {"waiting_time": 0.0, "turnaround_time": 3.0, "response_time": 0.0}
        }));
        let summary = SchedulerSummary::from_event(&event).unwrap();
        assert_eq!(summary.algorithm.as_deref(), Some("FCFS"));
        assert_eq!(summary.ticks, Some(5));
        assert_eq!(summary.processes[0].finish, Some(3));
        assert_eq!(summary.averages.turnaround_time, 3.0);

        let not_summary = SchedulerEvent::new(EventKind::Tick);
        assert!(SchedulerSummary::from_event(&not_summary).is_none());
    }
}
