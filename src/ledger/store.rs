//! JSON document persistence for the ledger
//!
//! The whole ledger is one JSON document. Writes go to a sibling temp file
//! that is renamed over the target so a crash never leaves a half-written
//! document behind.

use super::invocation::{AggregateCounters, Invocation};
use super::LedgerError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialized form of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    /// Oldest first
    #[serde(default)]
    pub invocations: Vec<Invocation>,
    #[serde(default)]
    pub counters: AggregateCounters,
}

/// Where the ledger document lives on disk
#[derive(Debug, Clone, Default)]
pub struct LedgerStore {
    path: Option<PathBuf>,
    legacy_path: Option<PathBuf>,
}

impl LedgerStore {
    /// Store that persists to `path`, migrating from `legacy_path` when present
    pub fn new(path: impl Into<PathBuf>, legacy_path: Option<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            legacy_path,
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the document, initializing or migrating it as needed
    pub async fn load(&self) -> Result<LedgerDocument, LedgerError> {
        let Some(path) = &self.path else {
            return Ok(LedgerDocument::default());
        };

        if tokio::fs::try_exists(path).await? {
            let document: LedgerDocument = read_json(path).await?;
            info!(
                path = %path.display(),
                invocations = document.invocations.len(),
                "Loaded invocation ledger"
            );
            return Ok(document);
        }

        if let Some(legacy) = &self.legacy_path {
            if tokio::fs::try_exists(legacy).await? {
                let document: LedgerDocument = read_json(legacy).await?;
                write_json_atomic(path, &document).await?;
                tokio::fs::remove_file(legacy).await?;
                info!(
                    from = %legacy.display(),
                    to = %path.display(),
                    invocations = document.invocations.len(),
                    "Migrated legacy invocation ledger"
                );
                return Ok(document);
            }
        }

        let document = LedgerDocument::default();
        write_json_atomic(path, &document).await?;
        info!(path = %path.display(), "Initialized empty invocation ledger");
        Ok(document)
    }

    pub async fn save(&self, document: &LedgerDocument) -> Result<(), LedgerError> {
        match &self.path {
            Some(path) => write_json_atomic(path, document).await,
            None => Ok(()),
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LedgerError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write `value` as pretty JSON to `path` via temp file and rename
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), LedgerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(path = %path.display(), error = %e, "Atomic rename failed");
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Persisted JSON document");
    Ok(())
}
