//! Planner → dispatcher → aggregator → ledger for one invocation
//!
//! The orchestrator is the only component that moves an invocation out of
//! `processing`. Runs are detached from the request that accepted them and
//! supervised: if a run panics, the supervisor records the fault instead.

use crate::aggregate::ResultAggregator;
use crate::dispatch::Dispatcher;
use crate::error::sanitize_error_message;
use crate::invocation_span;
use crate::ledger::{InvocationStatus, Ledger, LedgerError, TerminalUpdate};
use crate::planner::PlannerAdapter;
use crate::webhook::extract::extract_content;
use crate::webhook::registry::WebhookConfig;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Everything a detached run needs
#[derive(Debug, Clone)]
pub struct InvocationJob {
    pub invocation_id: String,
    pub config: WebhookConfig,
    pub payload: Value,
}

pub struct Orchestrator {
    planner: PlannerAdapter,
    dispatcher: Dispatcher,
    aggregator: ResultAggregator,
    ledger: Arc<Ledger>,
}

impl Orchestrator {
    pub fn new(
        planner: PlannerAdapter,
        dispatcher: Dispatcher,
        aggregator: ResultAggregator,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            aggregator,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Compute the terminal update for a job without touching the ledger
    pub async fn run(&self, job: &InvocationJob) -> TerminalUpdate {
        let extracted = extract_content(&job.payload);
        debug!(
            strategy = extracted.strategy,
            content_len = extracted.content.len(),
            "Extracted planner content"
        );

        let (instructions, planner_error) =
            match self.planner.plan(&extracted.content, &job.config).await {
                Ok(plan) => (plan, None),
                Err(e) => {
                    warn!(error = %e, "Planner failed, continuing with an empty plan");
                    (BTreeMap::new(), Some(format!("Planner failure: {e}")))
                }
            };

        let outcomes = self
            .dispatcher
            .dispatch(&instructions, &job.config.workers, job.config.dispatch_mode)
            .await;
        let verdict = self.aggregator.aggregate(&outcomes);

        let status = if verdict.success {
            InvocationStatus::Success
        } else {
            InvocationStatus::Failed
        };
        let error = if verdict.success {
            None
        } else {
            planner_error
                .or(verdict.reason)
                .map(|reason| sanitize_error_message(&reason))
        };

        TerminalUpdate {
            status,
            outcomes,
            instructions,
            error,
        }
    }

    /// Run a job and record its terminal state; never fails
    pub async fn execute(&self, job: InvocationJob) {
        let span = invocation_span!(
            invocation_id = %job.invocation_id,
            webhook_id = %job.config.id
        );

        async {
            info!("Processing invocation");
            let update = self.run(&job).await;
            match self.ledger.complete(&job.invocation_id, update).await {
                Ok(invocation) => info!(status = %invocation.status, "Invocation finished"),
                Err(e) => error!(error = %e, "Failed to record terminal state"),
            }
        }
        .instrument(span)
        .await
    }

    /// Start a supervised detached run
    ///
    /// The returned handle completes once the invocation is terminal, whether
    /// the run finished normally or panicked.
    pub fn submit(self: &Arc<Self>, job: InvocationJob) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let invocation_id = job.invocation_id.clone();

        tokio::spawn(async move {
            let worker = Arc::clone(&orchestrator);
            let run = tokio::spawn(async move { worker.execute(job).await });

            if let Err(join_error) = run.await {
                let fault = if join_error.is_panic() {
                    format!("Processing panicked: {}", panic_text(join_error.into_panic()))
                } else {
                    format!("Processing aborted: {join_error}")
                };
                orchestrator.record_fault(&invocation_id, &fault).await;
            }
        })
    }

    /// Mark an invocation failed with sanitized fault text
    pub async fn record_fault(&self, invocation_id: &str, fault: &str) {
        let message = sanitize_error_message(fault);
        error!(invocation_id = %invocation_id, fault = %message, "Invocation faulted");

        match self
            .ledger
            .complete(invocation_id, TerminalUpdate::fault(message))
            .await
        {
            Ok(_) => {}
            Err(LedgerError::AlreadyTerminal { .. }) => {
                debug!(invocation_id = %invocation_id, "Fault after terminal state ignored");
            }
            Err(e) => {
                error!(invocation_id = %invocation_id, error = %e, "Failed to record fault");
            }
        }
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DeliverySource, NewInvocation};
    use crate::testing::mocks::{MockBehavior, MockPlanner, MockWorkerClient};
    use crate::webhook::registry::{DispatchMode, WorkerTarget};
    use crate::worker::CapabilityCache;
    use crate::planner::TaskPlanner;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn meeting() -> WebhookConfig {
        WebhookConfig::new("meeting", "Meeting notes")
            .with_worker(WorkerTarget::new("slack", "http://slack"))
            .with_worker(WorkerTarget::new("github", "http://github"))
    }

    fn orchestrator(planner: Arc<dyn TaskPlanner>, workers: MockWorkerClient) -> Arc<Orchestrator> {
        let workers = Arc::new(workers);
        Arc::new(Orchestrator::new(
            PlannerAdapter::new(planner, workers.clone(), Arc::new(CapabilityCache::new())),
            Dispatcher::new(workers).with_timeout(Duration::from_millis(100)),
            ResultAggregator::new(),
            Arc::new(Ledger::in_memory(100)),
        ))
    }

    async fn accept(orchestrator: &Orchestrator, config: &WebhookConfig) -> InvocationJob {
        let payload = json!({"transcript": "Ship the release and file the bug"});
        let invocation = orchestrator
            .ledger()
            .record_processing(NewInvocation {
                webhook_id: config.id.clone(),
                name: config.name.clone(),
                source: DeliverySource::Live,
                raw_payload: payload.clone(),
                received_at: Utc::now(),
            })
            .await
            .unwrap();
        InvocationJob {
            invocation_id: invocation.invocation_id,
            config: config.clone(),
            payload,
        }
    }

    fn both_planned() -> Arc<MockPlanner> {
        Arc::new(MockPlanner::with_reply(json!({
            "tasks": {"slack": "Post summary", "github": "File bug"}
        })))
    }

    #[tokio::test]
    async fn test_timeout_scenario_marks_invocation_failed() {
        let orchestrator = orchestrator(
            both_planned(),
            MockWorkerClient::new().with_behavior("http://github", MockBehavior::Hang),
        );
        let job = accept(&orchestrator, &meeting()).await;
        let id = job.invocation_id.clone();

        orchestrator.submit(job).await.unwrap();

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert!(invocation.per_worker_outcome["slack"].succeeded);
        assert!(!invocation.per_worker_outcome["github"].succeeded);
        assert_eq!(invocation.planned_instructions["github"], "File bug");
        assert!(invocation.completed_at.is_some());

        let counters = orchestrator.ledger().counters().await;
        assert_eq!(counters.for_worker("slack"), 1);
        assert_eq!(counters.for_worker("github"), 1);
    }

    #[tokio::test]
    async fn test_all_workers_succeed() {
        let orchestrator = orchestrator(both_planned(), MockWorkerClient::new());
        let job = accept(&orchestrator, &meeting()).await;
        let id = job.invocation_id.clone();

        orchestrator.submit(job).await.unwrap();

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Success);
        assert!(invocation.error.is_none());
    }

    #[tokio::test]
    async fn test_planner_failure_yields_failed_with_empty_plan() {
        let workers = MockWorkerClient::new();
        let orchestrator = orchestrator(Arc::new(MockPlanner::with_failure()), workers);
        let job = accept(&orchestrator, &meeting()).await;
        let id = job.invocation_id.clone();

        orchestrator.submit(job).await.unwrap();

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert!(invocation.per_worker_outcome.is_empty());
        assert!(invocation.error.unwrap().starts_with("Planner failure"));
        assert_eq!(orchestrator.ledger().counters().await.total_processed, 1);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_fault() {
        let orchestrator = orchestrator(Arc::new(MockPlanner::with_panic()), MockWorkerClient::new());
        let job = accept(&orchestrator, &meeting()).await;
        let id = job.invocation_id.clone();

        orchestrator.submit(job).await.unwrap();

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert!(invocation
            .error
            .unwrap()
            .contains("Processing panicked: mock planner panic"));
    }

    #[tokio::test]
    async fn test_sequential_continues_after_failure() {
        let orchestrator = orchestrator(
            both_planned(),
            MockWorkerClient::new().with_behavior("http://slack", MockBehavior::Fail("nope".into())),
        );
        let config = meeting().with_dispatch_mode(DispatchMode::Sequential);
        let job = accept(&orchestrator, &config).await;
        let id = job.invocation_id.clone();

        orchestrator.submit(job).await.unwrap();

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Failed);
        assert!(!invocation.per_worker_outcome["slack"].succeeded);
        assert!(invocation.per_worker_outcome["github"].succeeded);
    }

    #[tokio::test]
    async fn test_record_fault_after_terminal_is_ignored() {
        let orchestrator = orchestrator(both_planned(), MockWorkerClient::new());
        let job = accept(&orchestrator, &meeting()).await;
        let id = job.invocation_id.clone();

        orchestrator.execute(job).await;
        orchestrator.record_fault(&id, "late fault").await;

        let invocation = orchestrator.ledger().get(&id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Success);
        assert_eq!(orchestrator.ledger().counters().await.total_processed, 1);
    }

    #[test]
    fn test_panic_text() {
        assert_eq!(panic_text(Box::new("static")), "static");
        assert_eq!(panic_text(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_text(Box::new(42_u8)), "unknown panic payload");
    }
}
