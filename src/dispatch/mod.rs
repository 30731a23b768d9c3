//! Execution of an instruction map against the configured workers
//!
//! Every instruction yields exactly one [`Outcome`]. Failures of one worker
//! never stop or cancel another: parallel calls are all joined and
//! sequential calls all run in turn.

use crate::ledger::Outcome;
use crate::webhook::registry::{DispatchMode, WorkerTarget};
use crate::worker::{TaskSubmission, WorkerClient, WorkerError};
use crate::{dispatch_span, worker_span};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

/// Default bound on a single worker call
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(120);

/// Error text for workers that cannot be called
pub const NO_ENDPOINT: &str = "no endpoint configured";

pub struct Dispatcher {
    client: Arc<dyn WorkerClient>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn WorkerClient>) -> Self {
        Self {
            client,
            timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every instruction and collect one outcome per worker id
    pub async fn dispatch(
        &self,
        instructions: &BTreeMap<String, String>,
        workers: &[WorkerTarget],
        mode: DispatchMode,
    ) -> BTreeMap<String, Outcome> {
        let span = dispatch_span!(mode = ?mode, instructions = instructions.len());

        async move {
            let outcomes = match mode {
                DispatchMode::Parallel => self.dispatch_parallel(instructions, workers).await,
                DispatchMode::Sequential => self.dispatch_sequential(instructions, workers).await,
            };

            let failed = outcomes.values().filter(|o| !o.succeeded).count();
            info!(
                outcomes = outcomes.len(),
                failed = failed,
                "Dispatch finished"
            );
            outcomes
        }
        .instrument(span)
        .await
    }

    async fn dispatch_parallel(
        &self,
        instructions: &BTreeMap<String, String>,
        workers: &[WorkerTarget],
    ) -> BTreeMap<String, Outcome> {
        let calls: Vec<_> = instructions
            .iter()
            .map(|(worker_id, instruction)| self.call(worker_id, instruction, workers))
            .collect();

        futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|outcome| (outcome.worker_id.clone(), outcome))
            .collect()
    }

    async fn dispatch_sequential(
        &self,
        instructions: &BTreeMap<String, String>,
        workers: &[WorkerTarget],
    ) -> BTreeMap<String, Outcome> {
        let mut outcomes = BTreeMap::new();
        for worker_id in sequential_order(instructions, workers) {
            let instruction = &instructions[worker_id];
            let outcome = self.call(worker_id, instruction, workers).await;
            outcomes.insert(worker_id.to_string(), outcome);
        }
        outcomes
    }

    async fn call(&self, worker_id: &str, instruction: &str, workers: &[WorkerTarget]) -> Outcome {
        let Some(url) = workers
            .iter()
            .find(|w| w.id == worker_id)
            .and_then(WorkerTarget::endpoint)
        else {
            warn!(worker_id = %worker_id, "Skipping worker without endpoint");
            return Outcome::failed(worker_id, instruction, NO_ENDPOINT);
        };

        let task = TaskSubmission::new(instruction);
        let span = worker_span!(worker_id = %worker_id, task_id = %task.task_id);
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.client.send_task(url, &task))
            .instrument(span.clone())
            .await
            .unwrap_or_else(|_| Err(WorkerError::Timeout(self.timeout)));
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(run) => {
                let succeeded = run.succeeded();
                let error_message = (!succeeded).then(|| {
                    let state = run.state.map(|s| s.to_string()).unwrap_or_default();
                    match &run.status_message {
                        Some(message) => format!("worker finished in state {state}: {message}"),
                        None => format!("worker finished in state {state}"),
                    }
                });
                Outcome {
                    worker_id: worker_id.to_string(),
                    succeeded,
                    error_message,
                    raw_result: run.to_raw_result(),
                    task_text: instruction.to_string(),
                    task_id: Some(task.task_id),
                    duration_ms,
                }
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, duration_ms, "Worker call failed");
                let mut outcome = Outcome::failed(worker_id, instruction, e.to_string());
                outcome.task_id = Some(task.task_id);
                outcome.duration_ms = duration_ms;
                outcome
            }
        };

        span.in_scope(|| {
            info!(
                worker_id = %worker_id,
                succeeded = outcome.succeeded,
                duration_ms,
                "Worker call settled"
            )
        });
        outcome
    }
}

/// Configured order first, then ids the config does not know, in id order
pub fn sequential_order<'a>(
    instructions: &'a BTreeMap<String, String>,
    workers: &'a [WorkerTarget],
) -> Vec<&'a str> {
    let configured = workers
        .iter()
        .map(|w| w.id.as_str())
        .filter(|id| instructions.contains_key(*id));
    let unknown = instructions
        .keys()
        .map(String::as_str)
        .filter(|id| !workers.iter().any(|w| w.id == *id));

    configured.chain(unknown).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{CallEvent, MockBehavior, MockWorkerClient};

    fn targets() -> Vec<WorkerTarget> {
        vec![
            WorkerTarget::new("slack", "http://slack"),
            WorkerTarget::new("github", "http://github"),
        ]
    }

    fn plan(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sequential_order_follows_config_then_ids() {
        let instructions = plan(&[("zeta", "z"), ("github", "g"), ("alpha", "a"), ("slack", "s")]);
        assert_eq!(
            sequential_order(&instructions, &targets()),
            vec!["slack", "github", "alpha", "zeta"]
        );
    }

    #[tokio::test]
    async fn test_missing_endpoint_and_unknown_worker_are_not_called() {
        let client = Arc::new(MockWorkerClient::new());
        let dispatcher = Dispatcher::new(client.clone());
        let mut workers = targets();
        workers[1].url = None;

        let outcomes = dispatcher
            .dispatch(
                &plan(&[("github", "file issue"), ("jira", "open ticket")]),
                &workers,
                DispatchMode::Parallel,
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes.values() {
            assert!(!outcome.succeeded);
            assert_eq!(outcome.error_message.as_deref(), Some(NO_ENDPOINT));
        }
        assert!(client.get_sent_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_failure_is_isolated() {
        let client = Arc::new(
            MockWorkerClient::new()
                .with_behavior("http://slack", MockBehavior::Error("connection refused".into()))
                .with_behavior("http://github", MockBehavior::Complete("issue #7".into())),
        );
        let dispatcher = Dispatcher::new(client);

        let outcomes = dispatcher
            .dispatch(
                &plan(&[("slack", "post"), ("github", "file")]),
                &targets(),
                DispatchMode::Parallel,
            )
            .await;

        assert!(!outcomes["slack"].succeeded);
        assert_eq!(outcomes["slack"].raw_result["error"], "Protocol violation: connection refused");
        assert!(outcomes["github"].succeeded);
        assert_eq!(outcomes["github"].raw_result["status"]["state"], "completed");
        assert_eq!(outcomes["github"].task_text, "file");
        assert!(outcomes["github"].task_id.is_some());
    }

    #[tokio::test]
    async fn test_parallel_calls_overlap() {
        let delay = Duration::from_millis(200);
        let client = Arc::new(
            MockWorkerClient::new()
                .with_behavior(
                    "http://slack",
                    MockBehavior::Delayed(delay, Box::new(MockBehavior::Complete("a".into()))),
                )
                .with_behavior(
                    "http://github",
                    MockBehavior::Delayed(delay, Box::new(MockBehavior::Complete("b".into()))),
                ),
        );
        let dispatcher = Dispatcher::new(client.clone());

        let started = Instant::now();
        dispatcher
            .dispatch(
                &plan(&[("slack", "a"), ("github", "b")]),
                &targets(),
                DispatchMode::Parallel,
            )
            .await;

        assert!(started.elapsed() < delay * 2);
        let log = client.get_call_log().await;
        assert!(matches!(log[0], CallEvent::Started(_)));
        assert!(matches!(log[1], CallEvent::Started(_)));
    }

    #[tokio::test]
    async fn test_sequential_runs_all_in_order_despite_failure() {
        let client = Arc::new(
            MockWorkerClient::new()
                .with_behavior("http://slack", MockBehavior::Fail("channel archived".into())),
        );
        let dispatcher = Dispatcher::new(client.clone());

        let outcomes = dispatcher
            .dispatch(
                &plan(&[("github", "file"), ("slack", "post")]),
                &targets(),
                DispatchMode::Sequential,
            )
            .await;

        assert!(!outcomes["slack"].succeeded);
        assert_eq!(
            outcomes["slack"].error_message.as_deref(),
            Some("worker finished in state failed: channel archived")
        );
        assert!(outcomes["github"].succeeded);
        assert_eq!(
            client.get_call_log().await,
            vec![
                CallEvent::Started("http://slack".into()),
                CallEvent::Finished("http://slack".into()),
                CallEvent::Started("http://github".into()),
                CallEvent::Finished("http://github".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_yields_failed_outcome() {
        let client = Arc::new(MockWorkerClient::new().with_behavior("http://github", MockBehavior::Hang));
        let dispatcher = Dispatcher::new(client).with_timeout(Duration::from_millis(50));

        let outcomes = dispatcher
            .dispatch(
                &plan(&[("slack", "post"), ("github", "file")]),
                &targets(),
                DispatchMode::Parallel,
            )
            .await;

        assert!(outcomes["slack"].succeeded);
        assert!(!outcomes["github"].succeeded);
        assert!(outcomes["github"]
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_incomplete_stream_is_failure() {
        let client = Arc::new(MockWorkerClient::new().with_behavior("http://slack", MockBehavior::Incomplete));
        let dispatcher = Dispatcher::new(client);

        let outcomes = dispatcher
            .dispatch(&plan(&[("slack", "post")]), &targets(), DispatchMode::Sequential)
            .await;

        assert!(!outcomes["slack"].succeeded);
        assert!(outcomes["slack"].raw_result.get("error").is_some());
    }

    #[tokio::test]
    async fn test_empty_plan_dispatches_nothing() {
        let client = Arc::new(MockWorkerClient::new());
        let dispatcher = Dispatcher::new(client.clone());

        let outcomes = dispatcher
            .dispatch(&BTreeMap::new(), &targets(), DispatchMode::Parallel)
            .await;
        assert!(outcomes.is_empty());
        assert!(client.get_sent_tasks().await.is_empty());
    }
}
