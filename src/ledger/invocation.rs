//! Invocation records, per-worker outcomes and aggregate counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Processing,
    Success,
    Failed,
}

impl InvocationStatus {
    /// Terminal states accept no further transitions
    pub fn is_terminal(self) -> bool {
        !matches!(self, InvocationStatus::Processing)
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InvocationStatus::Processing => "processing",
            InvocationStatus::Success => "success",
            InvocationStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Where a delivery came from; live and test traffic are deduplicated separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliverySource {
    #[default]
    Live,
    Test,
}

/// Normalized result of dispatching one instruction to one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub worker_id: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Worker result as received, kept for audit
    #[serde(default)]
    pub raw_result: Value,
    /// Instruction actually sent to the worker
    #[serde(default)]
    pub task_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Outcome {
    /// Failed outcome for a call that never produced a worker result
    pub fn failed(
        worker_id: impl Into<String>,
        task_text: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            worker_id: worker_id.into(),
            succeeded: false,
            raw_result: json!({ "error": message }),
            error_message: Some(message),
            task_text: task_text.into(),
            task_id: None,
            duration_ms: 0,
        }
    }
}

/// One end-to-end processing attempt for an accepted delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub invocation_id: String,
    pub webhook_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: InvocationStatus,
    #[serde(default)]
    pub source: DeliverySource,
    #[serde(default)]
    pub raw_payload: Value,
    #[serde(default)]
    pub per_worker_outcome: BTreeMap<String, Outcome>,
    #[serde(default)]
    pub planned_instructions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Invocation {
    pub fn summary(&self) -> InvocationSummary {
        InvocationSummary {
            invocation_id: self.invocation_id.clone(),
            webhook_id: self.webhook_id.clone(),
            name: self.name.clone(),
            status: self.status,
            source: self.source,
            created_at: self.created_at,
            completed_at: self.completed_at,
            workers: self.per_worker_outcome.keys().cloned().collect(),
            failed_workers: self
                .per_worker_outcome
                .values()
                .filter(|outcome| !outcome.succeeded)
                .map(|outcome| outcome.worker_id.clone())
                .collect(),
            error: self.error.clone(),
        }
    }
}

/// Fields supplied by ingress when an invocation is first recorded
#[derive(Debug, Clone)]
pub struct NewInvocation {
    pub webhook_id: String,
    pub name: String,
    pub source: DeliverySource,
    pub raw_payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Fields written by the single processing → terminal transition
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: InvocationStatus,
    pub outcomes: BTreeMap<String, Outcome>,
    pub instructions: BTreeMap<String, String>,
    pub error: Option<String>,
}

impl TerminalUpdate {
    /// Failed transition carrying only fault text
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failed,
            outcomes: BTreeMap::new(),
            instructions: BTreeMap::new(),
            error: Some(message.into()),
        }
    }
}

/// Compact view used by the stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSummary {
    pub invocation_id: String,
    pub webhook_id: String,
    pub name: String,
    pub status: InvocationStatus,
    pub source: DeliverySource,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub workers: Vec<String>,
    pub failed_workers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Monotonic per-worker invocation counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateCounters {
    pub total_processed: u64,
    pub per_worker: BTreeMap<String, u64>,
}

impl AggregateCounters {
    /// Count one terminal invocation and every worker that produced an outcome in it
    pub fn record<'a, I>(&mut self, workers: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.total_processed += 1;
        for worker_id in workers {
            *self.per_worker.entry(worker_id.to_string()).or_insert(0) += 1;
        }
    }

    pub fn for_worker(&self, worker_id: &str) -> u64 {
        self.per_worker.get(worker_id).copied().unwrap_or(0)
    }
}
