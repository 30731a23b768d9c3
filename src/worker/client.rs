//! HTTP implementation of the worker client
//!
//! Tasks are posted as JSON-RPC `message/stream` requests and the reply is
//! consumed as a server-sent event stream until the body ends. Capability
//! discovery is a plain GET of the worker's agent card.

use super::protocol::{
    parse_stream_payload, AgentCard, TaskRun, TaskSubmission, AGENT_CARD_PATH,
};
use super::sse::SseDecoder;
use super::{WorkerCapabilities, WorkerClient, WorkerError};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for capability discovery requests
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker client speaking JSON-RPC over HTTP with SSE responses
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
    discovery_timeout: Duration,
}

impl Default for HttpWorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpWorkerClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Set the capability discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    fn card_url(url: &str) -> String {
        format!("{}/{}", url.trim_end_matches('/'), AGENT_CARD_PATH)
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn send_task(&self, url: &str, task: &TaskSubmission) -> Result<TaskRun, WorkerError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&task.to_rpc_request())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/event-stream"))
            .unwrap_or(false);

        let mut run = TaskRun::new(task.task_id);

        if !is_event_stream {
            // Non-streaming workers answer with a single JSON-RPC envelope
            let payload: Value = response.json().await?;
            for event in parse_stream_payload(&payload)? {
                run.apply(event);
            }
            return Ok(run);
        }

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                apply_event_data(&mut run, &data)?;
            }
        }
        if let Some(data) = decoder.finish() {
            apply_event_data(&mut run, &data)?;
        }

        debug!(
            task_id = %task.task_id,
            events = run.events,
            state = ?run.state,
            "Worker stream ended"
        );

        if !run.is_terminal() {
            return Err(WorkerError::IncompleteStream {
                last_state: run.state.map(|s| s.to_string()),
            });
        }

        Ok(run)
    }

    async fn fetch_capabilities(&self, url: &str) -> Result<WorkerCapabilities, WorkerError> {
        let card_url = Self::card_url(url);
        let response = self
            .client
            .get(&card_url)
            .timeout(self.discovery_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %card_url, status = %status, "Capability discovery failed");
            return Err(WorkerError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let card: AgentCard = response.json().await?;
        Ok(WorkerCapabilities::from(card))
    }
}

fn apply_event_data(run: &mut TaskRun, data: &str) -> Result<(), WorkerError> {
    let payload: Value = serde_json::from_str(data)
        .map_err(|e| WorkerError::Protocol(format!("invalid event payload: {e}")))?;
    for event in parse_stream_payload(&payload)? {
        run.apply(event);
    }
    Ok(())
}
