//! Canonical scheduler events
//!
//! Every line the scheduler prints ends up as one [`SchedulerEvent`].
//! [`normalize`] maps the different payload shapes onto this record and
//! never fails; the run log stamps `run_id` and `sequence` on append.

mod kind;
mod normalize;

pub use kind::EventKind;
pub use normalize::{normalize, RawEvent};

use crate::error::ScopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one supervised run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }

    /// Placeholder carried by events that have not been appended yet
    pub fn unassigned() -> Self {
        RunId(Uuid::nil())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RunId(Uuid::parse_str(s.trim())?))
    }
}

/// Process identifier, or the idle sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pid {
    Idle,
    Process(u64),
}

impl Pid {
    /// Interpret a JSON value as a pid.
    ///
    /// Negative numbers and the strings `idle`/`none` mean idle. Strings
    /// such as `"P3"` are read as process 3. Anything else is `None`.
    pub fn from_value(value: &Value) -> Option<Pid> {
        match value {
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Some(Pid::Process(v))
                } else if n.as_i64().is_some() {
                    Some(Pid::Idle)
                } else {
                    n.as_f64().and_then(|f| {
                        if !f.is_finite() {
                            None
                        } else if f < 0.0 {
                            Some(Pid::Idle)
                        } else {
                            Some(Pid::Process(f as u64))
                        }
                    })
                }
            }
            Value::String(s) => Pid::parse(s),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Pid> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("idle") || s.eq_ignore_ascii_case("none") {
            return Some(Pid::Idle);
        }
        let digits = s.trim_start_matches(|c| c == 'P' || c == 'p');
        if let Ok(v) = digits.parse::<u64>() {
            return Some(Pid::Process(v));
        }
        match digits.parse::<i64>() {
            Ok(v) if v < 0 => Some(Pid::Idle),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Pid::Idle)
    }

    pub fn process(&self) -> Option<u64> {
        match self {
            Pid::Process(p) => Some(*p),
            Pid::Idle => None,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pid::Idle => f.write_str("idle"),
            Pid::Process(p) => write!(f, "{}", p),
        }
    }
}

impl Serialize for Pid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Pid::Idle => serializer.serialize_str("idle"),
            Pid::Process(p) => serializer.serialize_u64(*p),
        }
    }
}

impl<'de> Deserialize<'de> for Pid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Pid::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid pid: {}", value)))
    }
}

/// One canonical, normalized scheduler event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub run_id: RunId,
    /// Gap-free position within the run, assigned by the run log (1-based)
    pub sequence: u64,
    /// Scheduler logical time; absent for informational events
    pub tick: Option<u64>,
    pub kind: EventKind,
    pub pid: Option<Pid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Original text for `raw` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Fields that were present but not interpreted
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
    /// Wall-clock ingestion time. Display only, never used for ordering.
    pub received_at: DateTime<Utc>,
}

impl SchedulerEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            run_id: RunId::unassigned(),
            sequence: 0,
            tick: None,
            kind,
            pid: None,
            burst: None,
            remaining: None,
            priority: None,
            arrival: None,
            reason: None,
            raw: None,
            extra: Map::new(),
            received_at: Utc::now(),
        }
    }

    /// Catch-all event for text that is not an event object
    pub fn raw<S: Into<String>>(text: S) -> Self {
        let mut event = Self::new(EventKind::Raw);
        event.raw = Some(text.into());
        event
    }

    pub fn at(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    pub fn with_pid(mut self, pid: u64) -> Self {
        self.pid = Some(Pid::Process(pid));
        self
    }

    pub fn idle(mut self) -> Self {
        self.pid = Some(Pid::Idle);
        self
    }

    pub fn with_remaining(mut self, remaining: i64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_arrival(mut self, arrival: i64) -> Self {
        self.arrival = Some(arrival);
        self
    }

    pub fn with_burst(mut self, burst: i64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Process id if the event concerns a real process
    pub fn process(&self) -> Option<u64> {
        self.pid.and_then(|p| p.process())
    }

    /// Events without a tick are informational and visible at every cursor
    pub fn is_informational(&self) -> bool {
        self.tick.is_none()
    }
}
