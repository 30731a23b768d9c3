//! Worker wire protocol types
//!
//! Workers speak JSON-RPC 2.0 over HTTP. A task is submitted with the
//! `message/stream` method and answered with a server-sent event stream whose
//! payloads are JSON-RPC envelopes carrying status or artifact updates.
//! Capability discovery reads the worker's agent card.

use super::WorkerError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// JSON-RPC method used for streamed task submission
pub const STREAM_METHOD: &str = "message/stream";

/// Path of the capability document relative to the worker URL
pub const AGENT_CARD_PATH: &str = ".well-known/agent.json";

/// A task handed to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub task_id: Uuid,
    pub message: String,
}

impl TaskSubmission {
    /// New submission with a fresh task id
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            message: message.into(),
        }
    }

    /// JSON-RPC request body for this submission
    pub fn to_rpc_request(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.task_id.to_string(),
            "method": STREAM_METHOD,
            "params": {
                "message": {
                    "role": "user",
                    "kind": "message",
                    "messageId": Uuid::new_v4().to_string(),
                    "taskId": self.task_id.to_string(),
                    "parts": [{ "kind": "text", "text": self.message }],
                }
            }
        })
    }
}

/// Task lifecycle state reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Canceled,
    Failed,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// Parse a state label, tolerating case and underscore variants
    pub fn parse(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace('_', "-");
        serde_json::from_value(Value::String(normalized)).unwrap_or(TaskState::Unknown)
    }

    /// States after which the worker will send nothing more
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Canceled
                | TaskState::Failed
                | TaskState::Rejected
                | TaskState::InputRequired
                | TaskState::AuthRequired
        )
    }

    pub fn is_success(self) -> bool {
        self == TaskState::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::AuthRequired => "auth-required",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
            TaskState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content part of a message or artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
    File { file: Value },
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Output produced by a worker, possibly delivered in chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One event from a worker's task stream
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Status {
        state: TaskState,
        message: Option<String>,
        is_final: bool,
    },
    Artifact {
        artifact: Artifact,
        append: bool,
    },
}

/// Parse one stream payload (a JSON-RPC envelope) into task events
///
/// A `task` snapshot expands into its artifacts followed by its status; a
/// bare `message` reply is a completed task carrying that text.
pub fn parse_stream_payload(payload: &Value) -> Result<Vec<TaskEvent>, WorkerError> {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        return Err(WorkerError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified error")
                .to_string(),
        });
    }

    let result = payload.get("result").unwrap_or(payload);
    let kind = result.get("kind").and_then(Value::as_str).unwrap_or("");

    match kind {
        "status-update" => Ok(vec![status_event(result.get("status"), result.get("final"))]),
        "artifact-update" => {
            let artifact_value = result
                .get("artifact")
                .ok_or_else(|| WorkerError::Protocol("artifact-update without artifact".into()))?;
            let artifact = parse_artifact(artifact_value)?;
            let append = result.get("append").and_then(Value::as_bool).unwrap_or(false);
            Ok(vec![TaskEvent::Artifact { artifact, append }])
        }
        "task" => {
            let mut events = Vec::new();
            if let Some(artifacts) = result.get("artifacts").and_then(Value::as_array) {
                for (position, artifact_value) in artifacts.iter().enumerate() {
                    let mut artifact = parse_artifact(artifact_value)?;
                    if artifact_value.get("index").is_none() {
                        artifact.index = position as u32;
                    }
                    events.push(TaskEvent::Artifact {
                        artifact,
                        append: false,
                    });
                }
            }
            events.push(status_event(result.get("status"), Some(&Value::Bool(true))));
            Ok(events)
        }
        "message" => Ok(vec![TaskEvent::Status {
            state: TaskState::Completed,
            message: message_text(result),
            is_final: true,
        }]),
        other => Err(WorkerError::Protocol(format!(
            "unrecognized stream event kind '{other}'"
        ))),
    }
}

fn status_event(status: Option<&Value>, is_final: Option<&Value>) -> TaskEvent {
    let state = status
        .and_then(|s| s.get("state"))
        .and_then(Value::as_str)
        .map(TaskState::parse)
        .unwrap_or(TaskState::Unknown);
    let message = status.and_then(|s| s.get("message")).and_then(message_text);

    TaskEvent::Status {
        state,
        message,
        is_final: is_final.and_then(Value::as_bool).unwrap_or(false) || state.is_terminal(),
    }
}

fn parse_artifact(value: &Value) -> Result<Artifact, WorkerError> {
    serde_json::from_value(value.clone())
        .map_err(|e| WorkerError::Protocol(format!("invalid artifact: {e}")))
}

/// Text of a status message, which may be a plain string or a message object
fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Object(_) => {
            let texts: Vec<&str> = value
                .get("parts")
                .and_then(Value::as_array)?
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!texts.is_empty()).then(|| texts.join("\n"))
        }
        _ => None,
    }
}

/// Capability document published by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Accumulated state of one streamed task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRun {
    pub task_id: Uuid,
    pub state: Option<TaskState>,
    pub status_message: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub events: usize,
}

impl TaskRun {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            state: None,
            status_message: None,
            artifacts: Vec::new(),
            events: 0,
        }
    }

    /// Fold one event into the run
    pub fn apply(&mut self, event: TaskEvent) {
        self.events += 1;
        match event {
            TaskEvent::Status { state, message, .. } => {
                self.state = Some(state);
                if message.is_some() {
                    self.status_message = message;
                }
            }
            TaskEvent::Artifact { artifact, append } => {
                let existing = self.artifacts.iter_mut().find(|candidate| {
                    candidate.index == artifact.index && candidate.name == artifact.name
                });
                match existing {
                    Some(existing) if append => existing.parts.extend(artifact.parts),
                    Some(existing) => *existing = artifact,
                    None => {
                        self.artifacts.push(artifact);
                        self.artifacts.sort_by_key(|a| a.index);
                    }
                }
            }
        }
    }

    /// Whether the stream reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.map(TaskState::is_terminal).unwrap_or(false)
    }

    pub fn succeeded(&self) -> bool {
        self.state.map(TaskState::is_success).unwrap_or(false)
    }

    /// Concatenated text of all artifacts, in index order
    pub fn artifact_text(&self) -> String {
        self.artifacts
            .iter()
            .flat_map(|artifact| artifact.parts.iter().filter_map(Part::as_text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Audit record of the run stored on the outcome
    pub fn to_raw_result(&self) -> Value {
        let mut status = json!({
            "state": self.state.unwrap_or(TaskState::Unknown).as_str(),
        });
        if let Some(message) = &self.status_message {
            status["message"] = Value::String(message.clone());
        }

        json!({
            "taskId": self.task_id.to_string(),
            "status": status,
            "artifacts": self.artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_rpc_request_shape() {
        let submission = TaskSubmission::new("post summary to #general");
        let request = submission.to_rpc_request();

        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], STREAM_METHOD);
        assert_eq!(
            request["params"]["message"]["taskId"],
            submission.task_id.to_string()
        );
        assert_eq!(
            request["params"]["message"]["parts"][0]["text"],
            "post summary to #general"
        );
    }

    #[test]
    fn test_task_state_parse_variants() {
        assert_eq!(TaskState::parse("completed"), TaskState::Completed);
        assert_eq!(TaskState::parse("COMPLETED"), TaskState::Completed);
        assert_eq!(TaskState::parse("input_required"), TaskState::InputRequired);
        assert_eq!(TaskState::parse("bogus"), TaskState::Unknown);
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Working.is_terminal());
        assert!(!TaskState::Unknown.is_terminal());
    }

    #[test]
    fn test_parse_status_update() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "kind": "status-update",
                "status": {
                    "state": "working",
                    "message": {"kind": "message", "parts": [{"kind": "text", "text": "on it"}]}
                },
                "final": false
            }
        });

        let events = parse_stream_payload(&payload).unwrap();
        assert_eq!(
            events,
            vec![TaskEvent::Status {
                state: TaskState::Working,
                message: Some("on it".to_string()),
                is_final: false,
            }]
        );
    }

    #[test]
    fn test_parse_artifact_update() {
        let payload = json!({
            "result": {
                "kind": "artifact-update",
                "artifact": {"name": "issue", "index": 2, "parts": [{"kind": "text", "text": "#42"}]},
                "append": true
            }
        });

        let events = parse_stream_payload(&payload).unwrap();
        match &events[0] {
            TaskEvent::Artifact { artifact, append } => {
                assert!(*append);
                assert_eq!(artifact.name.as_deref(), Some("issue"));
                assert_eq!(artifact.index, 2);
                assert_eq!(artifact.parts[0].as_text(), Some("#42"));
            }
            other => panic!("expected artifact event, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_task_snapshot_expands_to_events() {
        let payload = json!({
            "result": {
                "kind": "task",
                "status": {"state": "completed"},
                "artifacts": [{"name": "a", "parts": [{"kind": "text", "text": "x"}]}]
            }
        });

        let events = parse_stream_payload(&payload).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            TaskEvent::Status {
                state: TaskState::Completed,
                is_final: true,
                ..
            }
        ));
    }

    #[test]
    fn test_rpc_error_envelope_is_an_error() {
        let payload = json!({"error": {"code": -32001, "message": "task not found"}});
        let error = parse_stream_payload(&payload).unwrap_err();
        assert!(matches!(error, WorkerError::Rpc { code: -32001, .. }));
    }

    #[test]
    fn test_unknown_kind_is_a_protocol_error() {
        let payload = json!({"result": {"kind": "telemetry"}});
        assert!(matches!(
            parse_stream_payload(&payload),
            Err(WorkerError::Protocol(_))
        ));
    }

    #[test]
    fn test_task_run_folds_appended_chunks_in_index_order() {
        let mut run = TaskRun::new(Uuid::new_v4());
        let text = |t: &str| vec![Part::Text { text: t.to_string() }];

        run.apply(TaskEvent::Artifact {
            artifact: Artifact {
                name: Some("b".into()),
                index: 1,
                parts: text("second"),
            },
            append: false,
        });
        run.apply(TaskEvent::Artifact {
            artifact: Artifact {
                name: Some("a".into()),
                index: 0,
                parts: text("first"),
            },
            append: false,
        });
        run.apply(TaskEvent::Artifact {
            artifact: Artifact {
                name: Some("a".into()),
                index: 0,
                parts: text("first, continued"),
            },
            append: true,
        });
        run.apply(TaskEvent::Status {
            state: TaskState::Completed,
            message: None,
            is_final: true,
        });

        assert!(run.is_terminal());
        assert!(run.succeeded());
        assert_eq!(run.events, 4);
        assert_eq!(run.artifact_text(), "first\nfirst, continued\nsecond");

        let raw = run.to_raw_result();
        assert_eq!(raw["status"]["state"], "completed");
        assert_eq!(raw["artifacts"][0]["name"], "a");
    }
}
