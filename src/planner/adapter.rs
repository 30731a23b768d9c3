//! Planner adapter: capability lookup, request assembly and reply normalization

use super::{PlanRequest, PlannerError, TaskPlanner, WorkerDescription};
use crate::webhook::registry::{WebhookConfig, WorkerTarget};
use crate::worker::{CapabilityCache, WorkerCapabilities, WorkerClient};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Object keys a planner may use to carry the instruction text
const INSTRUCTION_KEYS: [&str; 3] = ["task", "instruction", "message"];

pub struct PlannerAdapter {
    planner: Arc<dyn TaskPlanner>,
    workers: Arc<dyn WorkerClient>,
    capabilities: Arc<CapabilityCache>,
}

impl PlannerAdapter {
    pub fn new(
        planner: Arc<dyn TaskPlanner>,
        workers: Arc<dyn WorkerClient>,
        capabilities: Arc<CapabilityCache>,
    ) -> Self {
        Self {
            planner,
            workers,
            capabilities,
        }
    }

    /// Produce `workerId → instruction` for `content` under `config`
    pub async fn plan(
        &self,
        content: &str,
        config: &WebhookConfig,
    ) -> Result<BTreeMap<String, String>, PlannerError> {
        let mut descriptions = Vec::with_capacity(config.workers.len());
        for worker in &config.workers {
            let capabilities = self.resolve_capabilities(worker).await;
            descriptions.push(WorkerDescription {
                id: worker.id.clone(),
                name: capabilities.name,
                description: capabilities.description,
                examples: capabilities.examples,
            });
        }

        let prompt = config
            .planning_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|template| render_template(template, content, &descriptions));

        let request = PlanRequest {
            content: content.to_string(),
            prompt,
            workers: descriptions,
        };

        let reply = self
            .planner
            .plan(config.planner_url.as_deref(), &request)
            .await?;
        let plan = normalize_plan(&reply, config);

        debug!(
            webhook_id = %config.id,
            planned = plan.len(),
            configured = config.workers.len(),
            "Normalized planner reply"
        );
        Ok(plan)
    }

    async fn resolve_capabilities(&self, worker: &WorkerTarget) -> WorkerCapabilities {
        if let Some(configured) = &worker.capabilities {
            return configured.clone();
        }
        match worker.endpoint() {
            Some(url) => {
                self.capabilities
                    .get_or_fetch(self.workers.as_ref(), &worker.id, url)
                    .await
            }
            None => WorkerCapabilities::placeholder(&worker.id),
        }
    }
}

/// Fill `{{content}}` and `{{workers}}` in a planning template
pub fn render_template(template: &str, content: &str, workers: &[WorkerDescription]) -> String {
    let worker_lines = workers
        .iter()
        .map(|w| {
            let mut line = format!("- {} ({}): {}", w.id, w.name, w.description);
            if !w.examples.is_empty() {
                line.push_str(&format!(" e.g. {}", w.examples.join("; ")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    template
        .replace("{{content}}", content)
        .replace("{{workers}}", &worker_lines)
}

/// Turn a planner reply into a clean instruction map
///
/// Accepts `{"tasks": {..}}` or a bare map. Values may be strings or objects
/// carrying `task`, `instruction` or `message`. Blank instructions and ids not
/// in `config` are dropped.
pub fn normalize_plan(reply: &Value, config: &WebhookConfig) -> BTreeMap<String, String> {
    let entries = match reply.get("tasks").filter(|t| t.is_object()).unwrap_or(reply) {
        Value::Object(entries) => entries,
        other => {
            warn!(webhook_id = %config.id, reply_type = %json_type(other), "Planner reply is not an object");
            return BTreeMap::new();
        }
    };

    let mut plan = BTreeMap::new();
    for (worker_id, value) in entries {
        if config.worker(worker_id).is_none() {
            warn!(webhook_id = %config.id, worker_id = %worker_id, "Dropping instruction for unknown worker");
            continue;
        }

        let instruction = match value {
            Value::String(text) => Some(text.as_str()),
            Value::Object(fields) => INSTRUCTION_KEYS
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str)),
            _ => None,
        }
        .map(str::trim)
        .filter(|text| !text.is_empty());

        match instruction {
            Some(text) => {
                plan.insert(worker_id.clone(), text.to_string());
            }
            None => {
                warn!(webhook_id = %config.id, worker_id = %worker_id, "Dropping blank instruction");
            }
        }
    }
    plan
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
