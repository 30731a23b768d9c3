//! Application context
//!
//! Every long-lived component is an owned value assembled here and shared
//! with the HTTP handlers through an `Arc<AppContext>`.

use crate::aggregate::ResultAggregator;
use crate::config::ServiceConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{Ledger, LedgerStore};
use crate::observability::HealthState;
use crate::pipeline::Orchestrator;
use crate::planner::{HttpPlanner, HttpPlannerConfig, PlannerAdapter, TaskPlanner};
use crate::webhook::{DedupGuard, WebhookIngress, WebhookRegistry};
use crate::worker::{CapabilityCache, HttpWorkerClient, WorkerClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct AppContext {
    pub registry: Arc<WebhookRegistry>,
    pub dedup: Arc<DedupGuard>,
    pub ledger: Arc<Ledger>,
    pub capabilities: Arc<CapabilityCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub ingress: WebhookIngress,
    pub health: Arc<HealthState>,
}

impl AppContext {
    /// Load persisted state and wire the production HTTP clients
    pub async fn from_config(config: &ServiceConfig) -> ServiceResult<Self> {
        let store = match &config.ledger.path {
            Some(path) => LedgerStore::new(path.clone(), config.ledger.legacy_path.clone()),
            None => LedgerStore::in_memory(),
        };
        let ledger = Ledger::open(store, config.ledger.retention)
            .await
            .map_err(|e| ServiceError::persistence(format!("failed to open ledger: {e}")))?;

        let registry =
            WebhookRegistry::load(config.webhooks.clone(), config.registry.path.clone()).await?;

        let mut planner_config = HttpPlannerConfig::new()
            .with_timeout_ms(config.planner.timeout_ms)
            .with_retry_attempts(config.planner.retry_attempts);
        if let Some(url) = &config.planner.url {
            planner_config = planner_config.with_url(url);
        }

        let context = Self::assemble(
            Arc::new(registry),
            Arc::new(ledger),
            Arc::new(HttpPlanner::new(planner_config)),
            Arc::new(HttpWorkerClient::new()),
            config.dispatch.worker_timeout(),
        );

        info!(
            webhooks = context.registry.len().await,
            invocations = context.ledger.len().await,
            "Application context ready"
        );
        Ok(context)
    }

    /// Wire the pipeline around the given planner and worker client
    pub fn assemble(
        registry: Arc<WebhookRegistry>,
        ledger: Arc<Ledger>,
        planner: Arc<dyn TaskPlanner>,
        workers: Arc<dyn WorkerClient>,
        worker_timeout: Duration,
    ) -> Self {
        let dedup = Arc::new(DedupGuard::new());
        let capabilities = Arc::new(CapabilityCache::new());

        let orchestrator = Arc::new(Orchestrator::new(
            PlannerAdapter::new(planner, workers.clone(), capabilities.clone()),
            Dispatcher::new(workers).with_timeout(worker_timeout),
            ResultAggregator::new(),
            ledger.clone(),
        ));

        let ingress = WebhookIngress::new(
            registry.clone(),
            dedup.clone(),
            ledger.clone(),
            orchestrator.clone(),
        );

        let health = Arc::new(HealthState::new(ledger.clone(), registry.clone()));

        Self {
            registry,
            dedup,
            ledger,
            capabilities,
            orchestrator,
            ingress,
            health,
        }
    }
}
