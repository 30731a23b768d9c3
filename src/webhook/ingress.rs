//! Webhook ingress
//!
//! Validates the target config, suppresses duplicate deliveries, records the
//! invocation as `processing` and hands it to the orchestrator. The caller is
//! answered before any worker is contacted.

use super::dedup::DedupGuard;
use super::registry::WebhookRegistry;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{DeliverySource, InvocationStatus, Ledger, NewInvocation};
use crate::pipeline::{InvocationJob, Orchestrator};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Immediate answer to an accepted delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    pub success: bool,
    pub webhook_id: String,
    pub invocation_id: String,
    pub status: InvocationStatus,
}

pub struct WebhookIngress {
    registry: Arc<WebhookRegistry>,
    dedup: Arc<DedupGuard>,
    ledger: Arc<Ledger>,
    orchestrator: Arc<Orchestrator>,
}

impl WebhookIngress {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        dedup: Arc<DedupGuard>,
        ledger: Arc<Ledger>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            registry,
            dedup,
            ledger,
            orchestrator,
        }
    }

    /// Accept a delivery and start processing it in the background
    pub async fn handle(
        &self,
        webhook_id: &str,
        raw_body: &[u8],
        source: DeliverySource,
    ) -> ServiceResult<Acceptance> {
        self.accept(webhook_id, raw_body, source)
            .await
            .map(|(acceptance, _)| acceptance)
    }

    /// Like [`handle`](Self::handle), also returning the supervisor handle
    pub async fn accept(
        &self,
        webhook_id: &str,
        raw_body: &[u8],
        source: DeliverySource,
    ) -> ServiceResult<(Acceptance, JoinHandle<()>)> {
        let config = self
            .registry
            .get(webhook_id)
            .await
            .ok_or_else(|| ServiceError::config_not_found(webhook_id))?;

        let seen_at = Instant::now();
        if self.dedup.should_suppress_at(source, webhook_id, raw_body, seen_at) {
            warn!(webhook_id = %webhook_id, ?source, "Duplicate delivery rejected");
            return Err(ServiceError::duplicate_delivery(webhook_id));
        }

        let payload = parse_body(raw_body);
        let invocation = self
            .ledger
            .record_processing(NewInvocation {
                webhook_id: config.id.clone(),
                name: config.name.clone(),
                source,
                raw_payload: payload.clone(),
                received_at: Utc::now(),
            })
            .await
            .map_err(|e| {
                self.dedup.forget(source, webhook_id, raw_body, seen_at);
                ServiceError::persistence(e.to_string())
            })?;

        info!(
            webhook_id = %webhook_id,
            invocation_id = %invocation.invocation_id,
            ?source,
            "Accepted webhook delivery"
        );

        let handle = self.orchestrator.submit(InvocationJob {
            invocation_id: invocation.invocation_id.clone(),
            config,
            payload,
        });

        Ok((
            Acceptance {
                success: true,
                webhook_id: webhook_id.to_string(),
                invocation_id: invocation.invocation_id,
                status: InvocationStatus::Processing,
            },
            handle,
        ))
    }
}

/// JSON when it parses, otherwise the body as a string
pub fn parse_body(raw_body: &[u8]) -> Value {
    serde_json::from_slice(raw_body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw_body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ResultAggregator;
    use crate::dispatch::Dispatcher;
    use crate::planner::PlannerAdapter;
    use crate::testing::mocks::{MockPlanner, MockWorkerClient};
    use crate::webhook::registry::{WebhookConfig, WorkerTarget};
    use crate::worker::CapabilityCache;
    use crate::ledger::LedgerStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn ingress() -> (WebhookIngress, Arc<Ledger>, Arc<MockWorkerClient>) {
        ingress_with(Arc::new(Ledger::in_memory(100)))
    }

    fn ingress_with(ledger: Arc<Ledger>) -> (WebhookIngress, Arc<Ledger>, Arc<MockWorkerClient>) {
        let registry = Arc::new(WebhookRegistry::new(vec![WebhookConfig::new(
            "meeting",
            "Meeting notes",
        )
        .with_worker(WorkerTarget::new("slack", "http://slack"))]));
        let workers = Arc::new(MockWorkerClient::new());
        let planner = Arc::new(MockPlanner::with_reply(json!({"slack": "Post it"})));
        let orchestrator = Arc::new(Orchestrator::new(
            PlannerAdapter::new(planner, workers.clone(), Arc::new(CapabilityCache::new())),
            Dispatcher::new(workers.clone()),
            ResultAggregator::new(),
            ledger.clone(),
        ));
        (
            WebhookIngress::new(registry, Arc::new(DedupGuard::new()), ledger.clone(), orchestrator),
            ledger,
            workers,
        )
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body(b"plain text"), json!("plain text"));
        assert_eq!(parse_body(b""), json!(""));
    }

    #[tokio::test]
    async fn test_accept_records_processing_then_completes() {
        let (ingress, ledger, workers) = ingress();

        let (acceptance, handle) = ingress
            .accept("meeting", br#"{"transcript":"hi"}"#, DeliverySource::Live)
            .await
            .unwrap();
        assert!(acceptance.success);
        assert_eq!(acceptance.status, InvocationStatus::Processing);
        assert!(acceptance.invocation_id.starts_with("meeting-"));

        handle.await.unwrap();
        let invocation = ledger.get(&acceptance.invocation_id).await.unwrap();
        assert_eq!(invocation.status, InvocationStatus::Success);
        assert_eq!(invocation.raw_payload, json!({"transcript": "hi"}));
        assert_eq!(workers.get_sent_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_webhook_is_not_found() {
        let (ingress, ledger, _) = ingress();
        let result = ingress.handle("absent", b"{}", DeliverySource::Live).await;
        assert!(matches!(result, Err(ServiceError::ConfigNotFound { .. })));
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_creates_no_second_invocation() {
        let (ingress, ledger, _) = ingress();
        let body = br#"{"transcript":"same"}"#;

        ingress.handle("meeting", body, DeliverySource::Live).await.unwrap();
        let second = ingress.handle("meeting", body, DeliverySource::Live).await;
        assert!(matches!(second, Err(ServiceError::DuplicateDelivery { .. })));

        // the test namespace is separate
        ingress.handle("meeting", body, DeliverySource::Test).await.unwrap();
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_ledger_write_lets_the_retry_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invocations.json");
        let ledger = Arc::new(
            Ledger::open(LedgerStore::new(path.clone(), None), 100)
                .await
                .unwrap(),
        );
        let (ingress, ledger, _) = ingress_with(ledger);
        let body = br#"{"a":1}"#;

        // a directory in place of the document makes the rename fail
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::create_dir(&path).await.unwrap();
        let first = ingress.handle("meeting", body, DeliverySource::Live).await;
        assert!(matches!(first, Err(ServiceError::Persistence { .. })));
        assert!(ledger.is_empty().await);

        tokio::fs::remove_dir(&path).await.unwrap();
        let (retry, handle) = ingress
            .accept("meeting", body, DeliverySource::Live)
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(ledger.len().await, 1);
        assert!(ledger.get(&retry.invocation_id).await.is_some());
    }
}
