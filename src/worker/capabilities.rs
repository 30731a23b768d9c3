//! Per-URL capability cache
//!
//! Each worker URL gets its own `OnceCell`, so concurrent lookups for the same
//! URL share one fetch. A failed fetch leaves the cell empty and the caller
//! gets a placeholder; the next lookup tries again.

use super::{WorkerCapabilities, WorkerClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct CapabilityCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<WorkerCapabilities>>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capabilities for `url`, fetching them on first use
    ///
    /// `worker_id` only names the placeholder when the fetch fails.
    pub async fn get_or_fetch(
        &self,
        client: &dyn WorkerClient,
        worker_id: &str,
        url: &str,
    ) -> WorkerCapabilities {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(url.to_string()).or_default().clone()
        };

        let fetched = cell
            .get_or_try_init(|| async {
                debug!(worker_id = %worker_id, url = %url, "Fetching worker capabilities");
                client.fetch_capabilities(url).await
            })
            .await;

        match fetched {
            Ok(capabilities) => capabilities.clone(),
            Err(e) => {
                warn!(
                    worker_id = %worker_id,
                    url = %url,
                    error = %e,
                    "Capability discovery failed, using placeholder"
                );
                WorkerCapabilities::placeholder(worker_id)
            }
        }
    }

    /// Capabilities already known for `url`
    pub async fn cached(&self, url: &str) -> Option<WorkerCapabilities> {
        let cells = self.cells.lock().await;
        cells.get(url).and_then(|cell| cell.get().cloned())
    }
}
