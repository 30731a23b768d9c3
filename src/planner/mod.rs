//! Content-to-task planning
//!
//! The planner is an external service that reads webhook content and a list
//! of worker descriptions and answers with one instruction per worker. The
//! [`TaskPlanner`] trait is the seam; [`HttpPlanner`] is the production
//! implementation and [`PlannerAdapter`] wraps it with capability lookup and
//! reply normalization.

pub mod adapter;
pub mod http;

pub use adapter::{normalize_plan, render_template, PlannerAdapter};
pub use http::{HttpPlanner, HttpPlannerConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Planner call errors
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("No planner URL configured")]
    NotConfigured,

    #[error("Planner request failed: {0}")]
    Request(String),

    #[error("Planner returned status {status}")]
    Status { status: u16 },

    #[error("Planner timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid planner response: {0}")]
    InvalidResponse(String),
}

/// Worker as described to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDescription {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Body sent to the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub workers: Vec<WorkerDescription>,
}

/// Seam to the external planner
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    /// Ask the planner for instructions; `planner_url` overrides the default endpoint
    async fn plan(
        &self,
        planner_url: Option<&str>,
        request: &PlanRequest,
    ) -> Result<Value, PlannerError>;
}
