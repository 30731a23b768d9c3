//! Aggregation of per-worker outcomes into one verdict

pub mod shapes;

pub use shapes::{classify, KnownWorkers, ResultShape, Verdict};

use crate::error::ServiceError;
use crate::ledger::Outcome;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Overall judgement of one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateVerdict {
    pub success: bool,
    pub per_worker: BTreeMap<String, Verdict>,
    /// Why the invocation failed, when it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, outcomes: &BTreeMap<String, Outcome>) -> AggregateVerdict {
        if outcomes.is_empty() {
            return AggregateVerdict {
                success: false,
                per_worker: BTreeMap::new(),
                reason: Some("no worker produced an outcome".to_string()),
            };
        }

        let known: KnownWorkers = outcomes.keys().cloned().collect();
        let mut per_worker = BTreeMap::new();
        let mut failures = Vec::new();

        for (worker_id, outcome) in outcomes {
            let verdict = self.judge(worker_id, outcome, &known);
            let flagged = !outcome.succeeded || outcome.raw_result.get("error").is_some();
            if flagged || !verdict.success {
                let detail = outcome
                    .error_message
                    .clone()
                    .or_else(|| verdict.detail.clone())
                    .unwrap_or_else(|| "unsuccessful".to_string());
                failures.push(format!("{worker_id}: {detail}"));
            }
            per_worker.insert(worker_id.clone(), verdict);
        }

        let success = failures.is_empty();
        debug!(
            workers = per_worker.len(),
            failed = failures.len(),
            success,
            "Aggregated worker outcomes"
        );

        AggregateVerdict {
            success,
            per_worker,
            reason: (!success).then(|| failures.join("; ")),
        }
    }

    fn judge(&self, worker_id: &str, outcome: &Outcome, known: &KnownWorkers) -> Verdict {
        if let Some(error) = outcome.raw_result.get("error") {
            let detail = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Verdict::unparsed(detail);
        }

        classify(&outcome.raw_result, known).unwrap_or_else(|| {
            let error = ServiceError::AggregationAmbiguity {
                message: format!("worker {worker_id} returned an unrecognized result"),
            };
            warn!(worker_id = %worker_id, error = %error, "Treating unrecognized result as failure");
            Verdict::unparsed(error.to_string())
        })
    }
}
