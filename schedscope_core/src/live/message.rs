use crate::event::{RunId, SchedulerEvent};
use crate::supervisor::{FailureReason, RunStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Message delivered to live subscribers
#[derive(Debug, Clone)]
pub enum LiveMessage {
    Event(Arc<SchedulerEvent>),
    /// One line of scheduler diagnostics; not part of the event log
    Stderr { run_id: RunId, line: String },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
        exit_code: Option<i32>,
        failure: Option<FailureReason>,
    },
    RunKilled { run_id: RunId },
}

impl LiveMessage {
    pub fn run_id(&self) -> RunId {
        match self {
            LiveMessage::Event(event) => event.run_id,
            LiveMessage::Stderr { run_id, .. }
            | LiveMessage::RunFinished { run_id, .. }
            | LiveMessage::RunKilled { run_id } => *run_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LiveMessage::Event(_) => "event",
            LiveMessage::Stderr { .. } => "stderr",
            LiveMessage::RunFinished { .. } => "run_finished",
            LiveMessage::RunKilled { .. } => "run_killed",
        }
    }

    /// Wire form sent to dashboard clients
    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            LiveMessage::Event(event) => {
                serde_json::to_value(event.as_ref()).unwrap_or(Value::Null)
            }
            LiveMessage::Stderr { line, .. } => serde_json::json!({ "line": line }),
            LiveMessage::RunFinished {
                status,
                exit_code,
                failure,
                ..
            } => serde_json::json!({
                "status": status,
                "exit_code": exit_code,
                "failure": failure,
            }),
            LiveMessage::RunKilled { .. } => serde_json::json!({}),
        };

        Envelope {
            kind: self.type_name().to_string(),
            run_id: self.run_id(),
            payload,
        }
    }
}

impl From<Arc<SchedulerEvent>> for LiveMessage {
    fn from(event: Arc<SchedulerEvent>) -> Self {
        LiveMessage::Event(event)
    }
}

/// `{type, run_id, payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub run_id: RunId,
    pub payload: Value,
}
