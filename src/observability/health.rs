//! Health endpoints for operators and container orchestration
//!
//! `/health` reports ledger and registry state, `/ready` flips to 200 once
//! startup has loaded persisted state, `/live` answers as long as the process
//! serves requests.

use crate::ledger::Ledger;
use crate::webhook::registry::WebhookRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Shared state behind the health routes
pub struct HealthState {
    started: Instant,
    ready: AtomicBool,
    ledger: Arc<Ledger>,
    registry: Arc<WebhookRegistry>,
}

impl HealthState {
    pub fn new(ledger: Arc<Ledger>, registry: Arc<WebhookRegistry>) -> Self {
        Self {
            started: Instant::now(),
            ready: AtomicBool::new(false),
            ledger,
            registry,
        }
    }

    /// Mark startup complete
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    async fn get_health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let stats = self.ledger.stats().await;
        let webhooks = self.registry.len().await;

        let mut checks = HashMap::new();
        checks.insert(
            "ledger".to_string(),
            HealthCheck {
                status: "healthy".to_string(),
                message: Some(format!(
                    "{} recent invocations, {} processing",
                    stats.recent.len(),
                    stats.processing
                )),
                last_check: now,
            },
        );
        checks.insert(
            "registry".to_string(),
            HealthCheck {
                status: if webhooks > 0 { "healthy" } else { "empty" }.to_string(),
                message: Some(format!("{webhooks} webhook configs")),
                last_check: now,
            },
        );

        let status = if self.is_ready() { "healthy" } else { "starting" };

        HealthStatus {
            status: status.to_string(),
            timestamp: now,
            uptime_seconds: self.uptime_seconds(),
            webhooks,
            invocations: InvocationCounts {
                total_processed: stats.counters.total_processed,
                processing: stats.processing,
                recent: stats.recent.len(),
            },
            checks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationCounts {
    total_processed: u64,
    processing: usize,
    recent: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: String,
    timestamp: u64,
    uptime_seconds: u64,
    webhooks: usize,
    invocations: InvocationCounts,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

/// `GET /health`, `GET /ready` and `GET /live`
pub fn health_routes(
    state: Arc<HealthState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health_state = state.clone();
    let ready_state = state;

    // GET /health - ledger, registry and uptime
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let state = health_state.clone();
            async move {
                let status = state.get_health_status().await;
                let code = if state.is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

    // GET /ready - readiness probe
    let ready_route = warp::path("ready")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let state = ready_state.clone();
            async move {
                let ready = state.is_ready();
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

    // GET /live - liveness probe
    let live_route = warp::path("live")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(|| async {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

    health_route.or(ready_route).or(live_route)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
