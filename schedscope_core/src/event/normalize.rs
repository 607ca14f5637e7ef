use super::{EventKind, Pid, SchedulerEvent};
use serde_json::{Map, Value};

/// Input accepted by [`normalize`]
#[derive(Debug, Clone)]
pub enum RawEvent {
    /// One line of scheduler output, JSON or not
    Line(String),
    /// An already-decoded value
    Object(Value),
}

impl From<String> for RawEvent {
    fn from(line: String) -> Self {
        RawEvent::Line(line)
    }
}

impl From<&str> for RawEvent {
    fn from(line: &str) -> Self {
        RawEvent::Line(line.to_string())
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        RawEvent::Object(value)
    }
}

const KIND_KEYS: &[&str] = &["kind", "event", "type"];
const TICK_KEYS: &[&str] = &["tick", "time"];
// `job_id` is the simulated job; when both are present `pid` is the OS pid
const PID_KEYS: &[&str] = &["job_id", "pid", "process"];
const BURST_KEYS: &[&str] = &["burst", "burst_time"];
const ARRIVAL_KEYS: &[&str] = &["arrival", "arrival_time"];

/// Map a raw payload onto a [`SchedulerEvent`].
///
/// Total: text that is not a JSON object becomes a `raw` event carrying
/// the original text. Fields that are not interpreted land in `extra`.
pub fn normalize(raw: impl Into<RawEvent>) -> SchedulerEvent {
    match raw.into() {
        RawEvent::Line(line) => normalize_line(line),
        RawEvent::Object(Value::Object(map)) => from_object(map),
        RawEvent::Object(Value::String(text)) => SchedulerEvent::raw(text),
        RawEvent::Object(other) => SchedulerEvent::raw(other.to_string()),
    }
}

fn normalize_line(line: String) -> SchedulerEvent {
    match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(map)) => from_object(map),
        _ => SchedulerEvent::raw(line),
    }
}

fn from_object(mut map: Map<String, Value>) -> SchedulerEvent {
    // Some builds nest the payload under `data`
    let mut data = match map.remove("data") {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            map.insert("data".to_string(), other);
            Map::new()
        }
        None => Map::new(),
    };

    let kind = match take_string(&mut map, &mut data, KIND_KEYS) {
        Some(kind) => EventKind::parse(&kind),
        None if map.contains_key("algorithm") && map.contains_key("processes") => {
            EventKind::Summary
        }
        None => {
            if !data.is_empty() {
                map.insert("data".to_string(), Value::Object(data));
            }
            return SchedulerEvent::raw(Value::Object(map).to_string());
        }
    };

    let mut event = SchedulerEvent::new(kind);
    event.tick = take(&mut map, &mut data, TICK_KEYS).and_then(|v| as_tick(&v));
    event.pid = take(&mut map, &mut data, PID_KEYS).and_then(|v| Pid::from_value(&v));
    event.burst = take(&mut map, &mut data, BURST_KEYS).and_then(|v| as_int(&v));
    event.remaining = take(&mut map, &mut data, &["remaining"]).and_then(|v| as_int(&v));
    event.priority = take(&mut map, &mut data, &["priority"]).and_then(|v| as_int(&v));
    event.arrival = take(&mut map, &mut data, ARRIVAL_KEYS).and_then(|v| as_int(&v));
    event.reason = take_string(&mut map, &mut data, &["reason"]);
    if event.kind == EventKind::Raw {
        event.raw = take_string(&mut map, &mut data, &["raw", "line", "message"]);
    }

    if !data.is_empty() {
        map.insert("data".to_string(), Value::Object(data));
    }
    event.extra = map;
    event
}

/// Remove the first key present, looking at the top level before `data`
fn take(map: &mut Map<String, Value>, data: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    for key in keys {
        if let Some(v) = map.remove(*key) {
            if !v.is_null() {
                return Some(v);
            }
        }
    }
    for key in keys {
        if let Some(v) = data.remove(*key) {
            if !v.is_null() {
                return Some(v);
            }
        }
    }
    None
}

fn take_string(
    map: &mut Map<String, Value>,
    data: &mut Map<String, Value>,
    keys: &[&str],
) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = map.get(*key) {
            let s = s.clone();
            map.remove(*key);
            return Some(s);
        }
    }
    for key in keys {
        if let Some(Value::String(s)) = data.get(*key) {
            let s = s.clone();
            data.remove(*key);
            return Some(s);
        }
    }
    None
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_tick(value: &Value) -> Option<u64> {
    as_int(value).and_then(|t| u64::try_from(t).ok())
}
