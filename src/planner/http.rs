//! HTTP planner client
//!
//! Posts a [`PlanRequest`] to the planner endpoint and returns the JSON reply.
//! Server errors and network failures are retried with exponential backoff;
//! timeouts and client errors are not.
//!
//! # Example
//!
//! ```no_run
//! use hookfan::planner::{HttpPlanner, HttpPlannerConfig};
//!
//! let planner = HttpPlanner::new(
//!     HttpPlannerConfig::new()
//!         .with_url("http://localhost:8000/plan")
//!         .with_timeout_ms(30_000)
//!         .with_retry_attempts(2),
//! );
//! ```

use super::{PlanRequest, PlannerError, TaskPlanner};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for the planner service
#[derive(Debug, Clone, PartialEq)]
pub struct HttpPlannerConfig {
    /// Default endpoint; webhooks may override it
    pub url: Option<String>,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries for 5xx responses and network errors
    pub retry_attempts: usize,
}

impl Default for HttpPlannerConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 30_000,
            retry_attempts: 2,
        }
    }
}

impl HttpPlannerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: usize) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct HttpPlanner {
    config: HttpPlannerConfig,
    client: reqwest::Client,
}

impl HttpPlanner {
    pub fn new(config: HttpPlannerConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &HttpPlannerConfig {
        &self.config
    }

    async fn call_with_retry(&self, url: &str, request: &PlanRequest) -> Result<Value, PlannerError> {
        let timeout = self.config.timeout();
        let retry_attempts = self.config.retry_attempts;
        let mut last_error = None;

        for attempt in 0..=retry_attempts {
            debug!(
                attempt = attempt + 1,
                max_attempts = retry_attempts + 1,
                url = %url,
                "Calling planner"
            );

            match self
                .client
                .post(url)
                .json(request)
                .timeout(timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response
                            .text()
                            .await
                            .map_err(|e| PlannerError::Request(format!("failed to read body: {e}")))?;
                        let parsed: Value = serde_json::from_str(&body)
                            .map_err(|e| PlannerError::InvalidResponse(e.to_string()))?;
                        info!(url = %url, "Received plan from planner");
                        return Ok(parsed);
                    } else if status.is_server_error() && attempt < retry_attempts {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "Planner returned server error, retrying"
                        );
                        backoff(attempt).await;
                        last_error = Some(PlannerError::Status {
                            status: status.as_u16(),
                        });
                        continue;
                    } else {
                        return Err(PlannerError::Status {
                            status: status.as_u16(),
                        });
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(PlannerError::Timeout(timeout));
                }
                Err(e) if attempt < retry_attempts => {
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        "Planner network error, retrying"
                    );
                    backoff(attempt).await;
                    last_error = Some(PlannerError::Request(e.to_string()));
                    continue;
                }
                Err(e) => {
                    return Err(PlannerError::Request(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PlannerError::Request("retries exhausted".to_string())))
    }
}

/// Upper bound on the wait between planner attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 100ms doubled per attempt, capped at [`MAX_BACKOFF`]
pub fn backoff_delay(attempt: usize) -> Duration {
    let factor = u32::try_from(attempt)
        .ok()
        .and_then(|exp| 2_u64.checked_pow(exp))
        .unwrap_or(u64::MAX);
    Duration::from_millis(100_u64.saturating_mul(factor)).min(MAX_BACKOFF)
}

async fn backoff(attempt: usize) {
    tokio::time::sleep(backoff_delay(attempt)).await;
}

#[async_trait]
impl TaskPlanner for HttpPlanner {
    async fn plan(
        &self,
        planner_url: Option<&str>,
        request: &PlanRequest,
    ) -> Result<Value, PlannerError> {
        let url = planner_url
            .filter(|u| !u.trim().is_empty())
            .or(self.config.url.as_deref())
            .ok_or(PlannerError::NotConfigured)?;

        self.call_with_retry(url, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::WorkerDescription;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(100));
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
        assert_eq!(backoff_delay(20), MAX_BACKOFF);
        assert_eq!(backoff_delay(64), MAX_BACKOFF);
        assert_eq!(backoff_delay(usize::MAX), MAX_BACKOFF);
    }

    fn request() -> PlanRequest {
        PlanRequest {
            content: "Standup: ship the release".to_string(),
            prompt: None,
            workers: vec![WorkerDescription {
                id: "slack".to_string(),
                name: "Slack".to_string(),
                description: "Posts messages".to_string(),
                examples: vec![],
            }],
        }
    }

    fn planner_for(server: &MockServer, retry_attempts: usize) -> HttpPlanner {
        HttpPlanner::new(
            HttpPlannerConfig::new()
                .with_url(format!("{}/plan", server.uri()))
                .with_timeout_ms(2000)
                .with_retry_attempts(retry_attempts),
        )
    }

    #[tokio::test]
    async fn test_successful_plan() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plan"))
            .and(body_partial_json(json!({"content": "Standup: ship the release"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tasks": {"slack": "Post the release note"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = planner_for(&server, 2).plan(None, &request()).await.unwrap();
        assert_eq!(reply["tasks"]["slack"], "Post the release note");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result = planner_for(&server, 2).plan(None, &request()).await;
        assert!(matches!(result, Err(PlannerError::Status { status: 503 })));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422))
            .expect(1)
            .mount(&server)
            .await;

        let result = planner_for(&server, 3).plan(None, &request()).await;
        assert!(matches!(result, Err(PlannerError::Status { status: 422 })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(
            HttpPlannerConfig::new()
                .with_url(server.uri())
                .with_timeout_ms(100),
        );
        let result = planner.plan(None, &request()).await;
        assert!(matches!(result, Err(PlannerError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_per_webhook_url_override() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custom"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"slack": "hi"})))
            .expect(1)
            .mount(&server)
            .await;

        let planner = HttpPlanner::new(HttpPlannerConfig::new());
        let url = format!("{}/custom", server.uri());
        let reply = planner.plan(Some(url.as_str()), &request()).await.unwrap();
        assert_eq!(reply["slack"], "hi");
    }

    #[tokio::test]
    async fn test_missing_url_is_not_configured() {
        let planner = HttpPlanner::new(HttpPlannerConfig::new());
        let result = planner.plan(None, &request()).await;
        assert!(matches!(result, Err(PlannerError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_invalid_json_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let result = planner_for(&server, 0).plan(None, &request()).await;
        assert!(matches!(result, Err(PlannerError::InvalidResponse(_))));
    }
}
