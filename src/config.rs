//! Service configuration
//!
//! Loaded from a TOML file. Every section is optional and falls back to
//! defaults, so an empty file yields a runnable (if webhook-less) service.

use crate::webhook::registry::WebhookConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding `[server].port`
pub const PORT_ENV: &str = "HOOKFAN_PORT";

/// Most planner retries a config may ask for
pub const MAX_PLANNER_RETRIES: usize = 10;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub registry: RegistrySection,
    /// Webhooks declared in the file; a persisted registry overrides them by id
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSection {
    /// Ledger document; absent means in-memory only
    #[serde(default = "default_ledger_path")]
    pub path: Option<PathBuf>,
    /// Older document location migrated on first start
    #[serde(default)]
    pub legacy_path: Option<PathBuf>,
    /// Cap on invocations kept in the recent view
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            legacy_path: None,
            retention: default_retention(),
        }
    }
}

fn default_ledger_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/invocations.json"))
}

fn default_retention() -> usize {
    crate::ledger::DEFAULT_RETENTION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    /// Bound on a single worker call (default: 120 seconds)
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            worker_timeout_secs: default_worker_timeout_secs(),
        }
    }
}

impl DispatchSection {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }
}

fn default_worker_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerSection {
    /// Default planner endpoint; webhooks may override it
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_planner_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_planner_retry_attempts")]
    pub retry_attempts: usize,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_planner_timeout_ms(),
            retry_attempts: default_planner_retry_attempts(),
        }
    }
}

fn default_planner_timeout_ms() -> u64 {
    30_000
}

fn default_planner_retry_attempts() -> usize {
    2
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistrySection {
    /// JSON file the webhook registry is persisted to
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid webhook configuration: {0}")]
    InvalidWebhook(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ServiceConfig = toml::from_str(content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.server.port = port.trim().parse().map_err(|_| {
                ConfigError::InvalidConfig(format!("{PORT_ENV} must be a port number, got '{port}'"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.retention == 0 {
            return Err(ConfigError::InvalidConfig(
                "[ledger].retention must be at least 1".to_string(),
            ));
        }
        if self.dispatch.worker_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "[dispatch].worker_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.planner.retry_attempts > MAX_PLANNER_RETRIES {
            return Err(ConfigError::InvalidConfig(format!(
                "[planner].retry_attempts must be at most {MAX_PLANNER_RETRIES}"
            )));
        }
        if let Some(url) = &self.planner.url {
            url::Url::parse(url).map_err(|e| {
                ConfigError::InvalidConfig(format!("[planner].url '{url}' is invalid: {e}"))
            })?;
        }

        let mut seen = HashSet::new();
        for webhook in &self.webhooks {
            webhook.validate()?;
            if !seen.insert(webhook.id.as_str()) {
                return Err(ConfigError::InvalidWebhook(format!(
                    "webhook id '{}' is declared more than once",
                    webhook.id
                )));
            }
        }

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| ConfigError::InvalidConfig(format!("invalid bind address: {e}")))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 0

[ledger]
retention = 10

[dispatch]
worker_timeout_secs = 1

[[webhooks]]
id = "meeting"
name = "Meeting notes"
workers = [
    { id = "slack", url = "http://localhost:4001" },
    { id = "github", url = "http://localhost:4002" },
]
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
