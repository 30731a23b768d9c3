//! Remote worker agents
//!
//! Wire types, the [`WorkerClient`] seam used by dispatch and planning, the
//! HTTP/SSE implementation and the per-URL capability cache.

pub mod capabilities;
pub mod client;
pub mod protocol;
pub mod sse;

pub use capabilities::CapabilityCache;
pub use client::HttpWorkerClient;
pub use protocol::{TaskRun, TaskState, TaskSubmission};

use async_trait::async_trait;
use protocol::AgentCard;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Worker transport and protocol errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Worker returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Worker reported JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Stream ended without a terminal state (last state: {})", .last_state.as_deref().unwrap_or("none"))]
    IncompleteStream { last_state: Option<String> },

    #[error("Worker call timed out after {0:?}")]
    Timeout(Duration),
}

/// What a worker says it can do; fed to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl WorkerCapabilities {
    /// Stand-in used when discovery fails
    pub fn placeholder(worker_id: &str) -> Self {
        Self {
            name: worker_id.to_string(),
            description: format!("Worker {worker_id} (capabilities unavailable)"),
            examples: Vec::new(),
        }
    }
}

impl From<AgentCard> for WorkerCapabilities {
    fn from(card: AgentCard) -> Self {
        let description = card
            .description
            .filter(|d| !d.trim().is_empty())
            .or_else(|| {
                let skills: Vec<&str> = card
                    .skills
                    .iter()
                    .filter_map(|skill| skill.description.as_deref().or(skill.name.as_deref()))
                    .collect();
                (!skills.is_empty()).then(|| skills.join("; "))
            })
            .unwrap_or_default();

        Self {
            name: card.name,
            description,
            examples: card
                .skills
                .into_iter()
                .flat_map(|skill| skill.examples)
                .collect(),
        }
    }
}

/// Seam between the pipeline and remote workers
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Submit a task and consume its event stream to the end
    async fn send_task(&self, url: &str, task: &TaskSubmission) -> Result<TaskRun, WorkerError>;

    /// Read the worker's capability document
    async fn fetch_capabilities(&self, url: &str) -> Result<WorkerCapabilities, WorkerError>;
}
