//! Short-window suppression of repeated webhook deliveries
//!
//! A delivery is identified by the SHA-256 of its webhook id and raw body.
//! The first sighting opens a window; identical deliveries inside it are
//! suppressed without extending it.

use crate::ledger::DeliverySource;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Suppression window measured from the first occurrence
pub const DEDUP_WINDOW: Duration = Duration::from_secs(10);

/// Map size above which expired entries are swept
pub const SWEEP_THRESHOLD: usize = 100;

#[derive(Debug)]
pub struct DedupGuard {
    live: Mutex<HashMap<String, Instant>>,
    test: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::with_window(DEDUP_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            test: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Hex SHA-256 of `webhook_id`, a separator byte and `body`
    pub fn fingerprint(webhook_id: &str, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(webhook_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    /// True when an identical delivery was first seen less than one window ago
    pub fn should_suppress(&self, source: DeliverySource, webhook_id: &str, body: &[u8]) -> bool {
        self.should_suppress_at(source, webhook_id, body, Instant::now())
    }

    pub fn should_suppress_at(
        &self,
        source: DeliverySource,
        webhook_id: &str,
        body: &[u8],
        now: Instant,
    ) -> bool {
        let key = Self::fingerprint(webhook_id, body);
        let mut seen = self.namespace(source);

        if let Some(first) = seen.get(&key) {
            if now.saturating_duration_since(*first) < self.window {
                debug!(webhook_id = %webhook_id, ?source, "Suppressing duplicate delivery");
                return true;
            }
        }

        seen.insert(key, now);

        if seen.len() > SWEEP_THRESHOLD {
            let window = self.window;
            let before = seen.len();
            seen.retain(|_, first| now.saturating_duration_since(*first) < window);
            debug!(swept = before - seen.len(), remaining = seen.len(), "Swept dedup entries");
        }

        false
    }

    /// Drop the fingerprint recorded at `seen_at`, reopening the delivery
    ///
    /// A fingerprint recorded later by another delivery is left in place.
    pub fn forget(
        &self,
        source: DeliverySource,
        webhook_id: &str,
        body: &[u8],
        seen_at: Instant,
    ) -> bool {
        let key = Self::fingerprint(webhook_id, body);
        let mut seen = self.namespace(source);
        if seen.get(&key) == Some(&seen_at) {
            seen.remove(&key);
            debug!(webhook_id = %webhook_id, ?source, "Forgot delivery fingerprint");
            return true;
        }
        false
    }

    /// Number of fingerprints currently tracked in a namespace
    pub fn tracked(&self, source: DeliverySource) -> usize {
        self.namespace(source).len()
    }

    fn namespace(&self, source: DeliverySource) -> MutexGuard<'_, HashMap<String, Instant>> {
        let namespace = match source {
            DeliverySource::Live => &self.live,
            DeliverySource::Test => &self.test,
        };
        namespace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
