use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a scheduler event.
///
/// The closed vocabulary is interpreted by the reconstructors. Any other
/// string is kept as [`EventKind::Other`] and stored untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    JobArrived,
    JobStarted,
    JobResumed,
    JobPreempted,
    JobFinished,
    ContextSwitch,
    GanttSlice,
    Tick,
    StarvationWarning,
    /// Line that could not be interpreted as an event object
    Raw,
    /// Terminal aggregate emitted by the scheduler
    Summary,
    Other(String),
}

impl EventKind {
    /// Parse a kind string, accepting legacy aliases.
    ///
    /// Matching ignores case and treats `-` and spaces like `_`.
    pub fn parse(s: &str) -> Self {
        let key: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match key.as_str() {
            "job_arrived" | "arrived" | "arrival" => EventKind::JobArrived,
            "job_started" | "started" | "running" => EventKind::JobStarted,
            "job_resumed" | "resumed" => EventKind::JobResumed,
            "job_preempted" | "preempted" | "stopped" => EventKind::JobPreempted,
            "job_finished" | "finished" | "completed" => EventKind::JobFinished,
            "context_switch" | "switch" => EventKind::ContextSwitch,
            "gantt_slice" | "slice" => EventKind::GanttSlice,
            "tick" => EventKind::Tick,
            "starvation_warning" | "starvation" => EventKind::StarvationWarning,
            "raw" => EventKind::Raw,
            "summary" => EventKind::Summary,
            _ => EventKind::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::JobArrived => "job_arrived",
            EventKind::JobStarted => "job_started",
            EventKind::JobResumed => "job_resumed",
            EventKind::JobPreempted => "job_preempted",
            EventKind::JobFinished => "job_finished",
            EventKind::ContextSwitch => "context_switch",
            EventKind::GanttSlice => "gantt_slice",
            EventKind::Tick => "tick",
            EventKind::StarvationWarning => "starvation_warning",
            EventKind::Raw => "raw",
            EventKind::Summary => "summary",
            EventKind::Other(s) => s,
        }
    }

    /// Events that put a process (or idle) on the CPU
    pub fn is_dispatch(&self) -> bool {
        matches!(
            self,
            EventKind::JobStarted | EventKind::JobResumed | EventKind::ContextSwitch
        )
    }

    /// Events that take a process off the CPU
    pub fn is_release(&self) -> bool {
        matches!(self, EventKind::JobPreempted | EventKind::JobFinished)
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::parse(&s)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::parse(s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_and_aliases() {
        assert_eq!(EventKind::parse("job_started"), EventKind::JobStarted);
        assert_eq!(EventKind::parse("Job-Started"), EventKind::JobStarted);
        assert_eq!(EventKind::parse("running"), EventKind::JobStarted);
        assert_eq!(EventKind::parse("stopped"), EventKind::JobPreempted);
        assert_eq!(EventKind::parse("FINISHED"), EventKind::JobFinished);
        assert_eq!(EventKind::parse("context switch"), EventKind::ContextSwitch);
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let kind = EventKind::parse("queue_snapshot");
        assert_eq!(kind, EventKind::Other("queue_snapshot".to_string()));
        assert_eq!(kind.as_str(), "queue_snapshot");
        assert!(!kind.is_dispatch());
        assert!(!kind.is_release());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&EventKind::GanttSlice).unwrap();
        assert_eq!(json, "\"gantt_slice\"");
        let back: EventKind = serde_json::from_str("\"slice\"").unwrap();
        assert_eq!(back, EventKind::GanttSlice);
    }
}
