//! Invocation Ledger
//!
//! Holds every recent invocation record plus the aggregate per-worker
//! counters, and persists the whole document on each mutation. A single async
//! mutex guards the document; the persist step runs inside the same critical
//! section as the mutation, so counter increments from concurrently finishing
//! invocations cannot be lost or written out of order.

pub mod invocation;
pub mod store;

pub use invocation::{
    AggregateCounters, DeliverySource, Invocation, InvocationStatus, InvocationSummary,
    NewInvocation, Outcome, TerminalUpdate,
};
pub use store::{LedgerDocument, LedgerStore};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Default cap on invocations kept in the recent view
pub const DEFAULT_RETENTION: usize = 100;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invocation not found: {0}")]
    NotFound(String),

    #[error("Invocation {invocation_id} is already {status}")]
    AlreadyTerminal {
        invocation_id: String,
        status: InvocationStatus,
    },

    #[error("Invocation {invocation_id} can only move to a terminal status")]
    InvalidTransition { invocation_id: String },
}

/// Point-in-time view served by the stats endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub counters: AggregateCounters,
    pub processing: usize,
    /// Newest first
    pub recent: Vec<InvocationSummary>,
}

/// Derive the invocation id for a delivery received at `received_at`
pub fn derive_invocation_id(webhook_id: &str, received_at: DateTime<Utc>) -> String {
    format!("{webhook_id}-{}", received_at.timestamp_millis())
}

/// In-memory invocation store persisted as one JSON document
///
/// ```rust
/// # tokio_test::block_on(async {
/// use hookfan::ledger::{DeliverySource, InvocationStatus, Ledger, NewInvocation};
///
/// let ledger = Ledger::in_memory(100);
/// let invocation = ledger
///     .record_processing(NewInvocation {
///         webhook_id: "meeting".to_string(),
///         name: "Meeting notes".to_string(),
///         source: DeliverySource::Live,
///         raw_payload: serde_json::json!({"transcript": "hi"}),
///         received_at: chrono::Utc::now(),
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(invocation.status, InvocationStatus::Processing);
/// assert!(invocation.invocation_id.starts_with("meeting-"));
/// # });
/// ```
pub struct Ledger {
    state: Mutex<LedgerDocument>,
    store: LedgerStore,
    retention: usize,
}

impl Ledger {
    /// Open the ledger from its store, migrating or initializing as needed
    pub async fn open(store: LedgerStore, retention: usize) -> Result<Self, LedgerError> {
        let mut document = store.load().await?;
        trim_recent(&mut document.invocations, retention);

        Ok(Self {
            state: Mutex::new(document),
            store,
            retention: retention.max(1),
        })
    }

    /// Ledger that never persists
    pub fn in_memory(retention: usize) -> Self {
        Self {
            state: Mutex::new(LedgerDocument::default()),
            store: LedgerStore::in_memory(),
            retention: retention.max(1),
        }
    }

    /// Record a freshly accepted delivery in the `processing` state
    ///
    /// The invocation id is derived under the ledger lock so two deliveries
    /// arriving in the same millisecond still receive distinct ids. If the
    /// document cannot be persisted the record is rolled back.
    pub async fn record_processing(&self, new: NewInvocation) -> Result<Invocation, LedgerError> {
        let mut document = self.state.lock().await;

        let base_id = derive_invocation_id(&new.webhook_id, new.received_at);
        let mut invocation_id = base_id.clone();
        let mut suffix = 1;
        while document
            .invocations
            .iter()
            .any(|existing| existing.invocation_id == invocation_id)
        {
            invocation_id = format!("{base_id}-{suffix}");
            suffix += 1;
        }

        let invocation = Invocation {
            invocation_id: invocation_id.clone(),
            webhook_id: new.webhook_id,
            name: new.name,
            created_at: new.received_at,
            completed_at: None,
            status: InvocationStatus::Processing,
            source: new.source,
            raw_payload: new.raw_payload,
            per_worker_outcome: Default::default(),
            planned_instructions: Default::default(),
            error: None,
        };

        document.invocations.push(invocation.clone());

        if let Err(e) = self.store.save(&document).await {
            document
                .invocations
                .retain(|existing| existing.invocation_id != invocation_id);
            error!(invocation_id = %invocation_id, error = %e, "Failed to persist new invocation");
            return Err(e);
        }

        trim_recent(&mut document.invocations, self.retention);
        debug!(invocation_id = %invocation_id, "Recorded processing invocation");
        Ok(invocation)
    }

    /// Apply the single processing → terminal transition
    ///
    /// Counters are incremented in the same critical section, once per worker
    /// that produced an outcome. A second call for the same invocation is
    /// rejected without side effects. A persistence failure after the
    /// transition is logged; the in-memory state stays terminal.
    pub async fn complete(
        &self,
        invocation_id: &str,
        update: TerminalUpdate,
    ) -> Result<Invocation, LedgerError> {
        if !update.status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                invocation_id: invocation_id.to_string(),
            });
        }

        let mut guard = self.state.lock().await;
        let document = &mut *guard;

        let invocation = document
            .invocations
            .iter_mut()
            .find(|existing| existing.invocation_id == invocation_id)
            .ok_or_else(|| LedgerError::NotFound(invocation_id.to_string()))?;

        if invocation.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal {
                invocation_id: invocation_id.to_string(),
                status: invocation.status,
            });
        }

        invocation.status = update.status;
        invocation.completed_at = Some(Utc::now());
        invocation.per_worker_outcome = update.outcomes;
        invocation.planned_instructions = update.instructions;
        invocation.error = update.error;

        document
            .counters
            .record(invocation.per_worker_outcome.keys().map(String::as_str));

        let snapshot = invocation.clone();
        trim_recent(&mut document.invocations, self.retention);

        if let Err(e) = self.store.save(document).await {
            error!(
                invocation_id = %invocation_id,
                error = %e,
                "Failed to persist terminal invocation state"
            );
        }

        info!(
            invocation_id = %invocation_id,
            status = %snapshot.status,
            workers = snapshot.per_worker_outcome.len(),
            "Invocation reached terminal state"
        );

        Ok(snapshot)
    }

    pub async fn get(&self, invocation_id: &str) -> Option<Invocation> {
        let document = self.state.lock().await;
        document
            .invocations
            .iter()
            .find(|existing| existing.invocation_id == invocation_id)
            .cloned()
    }

    pub async fn counters(&self) -> AggregateCounters {
        self.state.lock().await.counters.clone()
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let document = self.state.lock().await;
        StatsSnapshot {
            counters: document.counters.clone(),
            processing: document
                .invocations
                .iter()
                .filter(|invocation| !invocation.status.is_terminal())
                .count(),
            recent: document
                .invocations
                .iter()
                .rev()
                .map(Invocation::summary)
                .collect(),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.invocations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Drop the oldest terminal invocations until the recent view fits `retention`
///
/// Invocations still processing are never dropped, otherwise their terminal
/// update would have nothing to land on.
fn trim_recent(invocations: &mut Vec<Invocation>, retention: usize) {
    let mut excess = invocations.len().saturating_sub(retention);
    if excess == 0 {
        return;
    }

    invocations.retain(|invocation| {
        if excess > 0 && invocation.status.is_terminal() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}
