//! Webhook configuration registry
//!
//! Configs are only ever replaced whole. When a registry path is configured
//! the full set is rewritten to disk after every mutation.

use crate::config::ConfigError;
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::store::write_json_atomic;
use crate::worker::WorkerCapabilities;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// How the instruction map is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Parallel,
    Sequential,
}

/// One worker a webhook may fan out to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTarget {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Configured capabilities take precedence over discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<WorkerCapabilities>,
}

impl WorkerTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Some(url.into()),
            capabilities: None,
        }
    }

    /// Endpoint to call, if one is configured
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Configuration of one webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub workers: Vec<WorkerTarget>,
    #[serde(default, alias = "dispatch_mode")]
    pub dispatch_mode: DispatchMode,
    #[serde(
        default,
        alias = "planning_template",
        skip_serializing_if = "Option::is_none"
    )]
    pub planning_template: Option<String>,
    #[serde(default, alias = "planner_url", skip_serializing_if = "Option::is_none")]
    pub planner_url: Option<String>,
}

impl WebhookConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            workers: Vec::new(),
            dispatch_mode: DispatchMode::default(),
            planning_template: None,
            planner_url: None,
        }
    }

    pub fn with_worker(mut self, worker: WorkerTarget) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    pub fn worker(&self, worker_id: &str) -> Option<&WorkerTarget> {
        self.workers.iter().find(|w| w.id == worker_id)
    }

    /// Check id format, name, worker id uniqueness and URLs
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_webhook_id(&self.id)?;

        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidWebhook(format!(
                "webhook '{}' requires a non-empty name",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.id.trim().is_empty() {
                return Err(ConfigError::InvalidWebhook(format!(
                    "webhook '{}' has a worker without an id",
                    self.id
                )));
            }
            if !seen.insert(worker.id.as_str()) {
                return Err(ConfigError::InvalidWebhook(format!(
                    "webhook '{}' lists worker '{}' more than once",
                    self.id, worker.id
                )));
            }
            if let Some(endpoint) = worker.endpoint() {
                validate_http_url(endpoint).map_err(|reason| {
                    ConfigError::InvalidWebhook(format!(
                        "worker '{}' of webhook '{}' has invalid url: {reason}",
                        worker.id, self.id
                    ))
                })?;
            }
        }

        if let Some(planner_url) = self.planner_url.as_deref().filter(|u| !u.trim().is_empty()) {
            validate_http_url(planner_url).map_err(|reason| {
                ConfigError::InvalidWebhook(format!(
                    "webhook '{}' has invalid plannerUrl: {reason}",
                    self.id
                ))
            })?;
        }

        Ok(())
    }
}

/// Webhook ids must match `[a-zA-Z0-9._-]+`
pub fn validate_webhook_id(webhook_id: &str) -> Result<(), ConfigError> {
    let valid_chars = webhook_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if webhook_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidWebhook(format!(
            "webhook id '{webhook_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn validate_http_url(raw: &str) -> Result<(), String> {
    let parsed = url::Url::parse(raw).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}

/// Owned store of webhook configs
#[derive(Debug, Default)]
pub struct WebhookRegistry {
    configs: RwLock<BTreeMap<String, WebhookConfig>>,
    path: Option<PathBuf>,
}

impl WebhookRegistry {
    /// In-memory registry seeded with `configs`
    pub fn new(configs: impl IntoIterator<Item = WebhookConfig>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id.clone(), c)).collect()),
            path: None,
        }
    }

    /// Registry backed by `path`; stored configs override same-id seeds
    pub async fn load(
        seeds: impl IntoIterator<Item = WebhookConfig>,
        path: Option<PathBuf>,
    ) -> ServiceResult<Self> {
        let mut configs: BTreeMap<String, WebhookConfig> =
            seeds.into_iter().map(|c| (c.id.clone(), c)).collect();

        if let Some(path) = &path {
            let exists = tokio::fs::try_exists(path)
                .await
                .map_err(|e| ServiceError::persistence(e.to_string()))?;
            if exists {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| ServiceError::persistence(e.to_string()))?;
                let stored: Vec<WebhookConfig> = serde_json::from_slice(&bytes).map_err(|e| {
                    ServiceError::persistence(format!("invalid webhook registry file: {e}"))
                })?;
                for config in stored {
                    if let Err(e) = config.validate() {
                        warn!(webhook_id = %config.id, error = %e, "Skipping invalid stored webhook config");
                        continue;
                    }
                    configs.insert(config.id.clone(), config);
                }
            }
            info!(path = %path.display(), webhooks = configs.len(), "Loaded webhook registry");
        }

        Ok(Self {
            configs: RwLock::new(configs),
            path,
        })
    }

    pub async fn list(&self) -> Vec<WebhookConfig> {
        self.configs.read().await.values().cloned().collect()
    }

    pub async fn get(&self, webhook_id: &str) -> Option<WebhookConfig> {
        self.configs.read().await.get(webhook_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.configs.read().await.is_empty()
    }

    /// Add a new config; fails if the id is taken
    pub async fn create(&self, config: WebhookConfig) -> ServiceResult<WebhookConfig> {
        config
            .validate()
            .map_err(|e| ServiceError::invalid_input(e.to_string()))?;

        let mut configs = self.configs.write().await;
        if configs.contains_key(&config.id) {
            return Err(ServiceError::already_exists(&config.id));
        }

        configs.insert(config.id.clone(), config.clone());
        if let Err(e) = self.persist(&configs).await {
            configs.remove(&config.id);
            return Err(e);
        }

        info!(webhook_id = %config.id, "Webhook config created");
        Ok(config)
    }

    /// Replace the whole config stored under `webhook_id`
    pub async fn replace(
        &self,
        webhook_id: &str,
        mut config: WebhookConfig,
    ) -> ServiceResult<WebhookConfig> {
        config.id = webhook_id.to_string();
        config
            .validate()
            .map_err(|e| ServiceError::invalid_input(e.to_string()))?;

        let mut configs = self.configs.write().await;
        let Some(previous) = configs.insert(webhook_id.to_string(), config.clone()) else {
            configs.remove(webhook_id);
            return Err(ServiceError::config_not_found(webhook_id));
        };

        if let Err(e) = self.persist(&configs).await {
            configs.insert(webhook_id.to_string(), previous);
            return Err(e);
        }

        info!(webhook_id = %webhook_id, "Webhook config replaced");
        Ok(config)
    }

    pub async fn remove(&self, webhook_id: &str) -> ServiceResult<WebhookConfig> {
        let mut configs = self.configs.write().await;
        let removed = configs
            .remove(webhook_id)
            .ok_or_else(|| ServiceError::config_not_found(webhook_id))?;

        if let Err(e) = self.persist(&configs).await {
            configs.insert(webhook_id.to_string(), removed);
            return Err(e);
        }

        info!(webhook_id = %webhook_id, "Webhook config removed");
        Ok(removed)
    }

    async fn persist(&self, configs: &BTreeMap<String, WebhookConfig>) -> ServiceResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let all: Vec<&WebhookConfig> = configs.values().collect();
        write_json_atomic(path, &all).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to persist webhook registry");
            ServiceError::persistence(e.to_string())
        })
    }
}
