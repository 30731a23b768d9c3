//! Mock implementations for testing
//!
//! Provides mock WorkerClient and TaskPlanner implementations so the pipeline
//! can be exercised without real worker agents or a planner service.

use crate::planner::{PlanRequest, PlannerError, TaskPlanner};
use crate::worker::protocol::{Artifact, Part, TaskEvent, TaskRun, TaskState, TaskSubmission};
use crate::worker::{WorkerCapabilities, WorkerClient, WorkerError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How the mock worker at one URL answers a task
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Completes with one text artifact
    Complete(String),
    /// Reaches the `failed` state with this status message
    Fail(String),
    /// Transport error before any event
    Error(String),
    /// Stream ends while still `working`
    Incomplete,
    /// Never answers
    Hang,
    /// Waits, then behaves as the inner behavior
    Delayed(Duration, Box<MockBehavior>),
}

/// Start/end markers in call order, for checking sequencing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Started(String),
    Finished(String),
}

/// Mock worker client keyed by worker URL
#[derive(Debug, Default)]
pub struct MockWorkerClient {
    behaviors: HashMap<String, MockBehavior>,
    capabilities: HashMap<String, WorkerCapabilities>,
    pub sent_tasks: Arc<Mutex<Vec<(String, TaskSubmission)>>>,
    pub call_log: Arc<Mutex<Vec<CallEvent>>>,
    pub capability_fetches: Arc<Mutex<Vec<String>>>,
}

impl MockWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, url: impl Into<String>, behavior: MockBehavior) -> Self {
        self.behaviors.insert(url.into(), behavior);
        self
    }

    /// Capability document served for `url`; other URLs fail discovery
    pub fn with_capabilities(
        mut self,
        url: impl Into<String>,
        capabilities: WorkerCapabilities,
    ) -> Self {
        self.capabilities.insert(url.into(), capabilities);
        self
    }

    pub async fn get_sent_tasks(&self) -> Vec<(String, TaskSubmission)> {
        self.sent_tasks.lock().await.clone()
    }

    pub async fn get_call_log(&self) -> Vec<CallEvent> {
        self.call_log.lock().await.clone()
    }

    pub async fn capability_fetch_count(&self, url: &str) -> usize {
        self.capability_fetches
            .lock()
            .await
            .iter()
            .filter(|fetched| fetched.as_str() == url)
            .count()
    }

    async fn run_behavior(
        behavior: MockBehavior,
        task: &TaskSubmission,
    ) -> Result<TaskRun, WorkerError> {
        let mut behavior = behavior;
        loop {
            match behavior {
                MockBehavior::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    behavior = *inner;
                }
                MockBehavior::Hang => {
                    std::future::pending::<()>().await;
                }
                MockBehavior::Error(message) => {
                    return Err(WorkerError::Protocol(message));
                }
                MockBehavior::Incomplete => {
                    return Err(WorkerError::IncompleteStream {
                        last_state: Some(TaskState::Working.to_string()),
                    });
                }
                MockBehavior::Fail(message) => {
                    let mut run = TaskRun::new(task.task_id);
                    run.apply(TaskEvent::Status {
                        state: TaskState::Failed,
                        message: Some(message),
                        is_final: true,
                    });
                    return Ok(run);
                }
                MockBehavior::Complete(text) => {
                    let mut run = TaskRun::new(task.task_id);
                    run.apply(TaskEvent::Artifact {
                        artifact: Artifact {
                            name: Some("result".to_string()),
                            index: 0,
                            parts: vec![Part::Text { text }],
                        },
                        append: false,
                    });
                    run.apply(TaskEvent::Status {
                        state: TaskState::Completed,
                        message: None,
                        is_final: true,
                    });
                    return Ok(run);
                }
            }
        }
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn send_task(&self, url: &str, task: &TaskSubmission) -> Result<TaskRun, WorkerError> {
        self.sent_tasks
            .lock()
            .await
            .push((url.to_string(), task.clone()));
        self.call_log
            .lock()
            .await
            .push(CallEvent::Started(url.to_string()));

        let behavior = self
            .behaviors
            .get(url)
            .cloned()
            .unwrap_or_else(|| MockBehavior::Complete("done".to_string()));
        let result = Self::run_behavior(behavior, task).await;

        self.call_log
            .lock()
            .await
            .push(CallEvent::Finished(url.to_string()));
        result
    }

    async fn fetch_capabilities(&self, url: &str) -> Result<WorkerCapabilities, WorkerError> {
        self.capability_fetches.lock().await.push(url.to_string());
        // Let concurrent lookups overlap
        tokio::time::sleep(Duration::from_millis(10)).await;

        self.capabilities
            .get(url)
            .cloned()
            .ok_or_else(|| WorkerError::Status {
                status: 404,
                body: "no agent card".to_string(),
            })
    }
}

/// Mock planner returning a fixed reply
#[derive(Debug, Default)]
pub struct MockPlanner {
    reply: Value,
    should_fail: bool,
    should_panic: bool,
    pub calls: Arc<Mutex<Vec<(Option<String>, PlanRequest)>>>,
}

impl MockPlanner {
    pub fn with_reply(reply: Value) -> Self {
        Self {
            reply,
            ..Default::default()
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Planner whose call panics, for exercising fault supervision
    pub fn with_panic() -> Self {
        Self {
            should_panic: true,
            ..Default::default()
        }
    }

    pub async fn get_calls(&self) -> Vec<(Option<String>, PlanRequest)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl TaskPlanner for MockPlanner {
    async fn plan(
        &self,
        planner_url: Option<&str>,
        request: &PlanRequest,
    ) -> Result<Value, PlannerError> {
        self.calls
            .lock()
            .await
            .push((planner_url.map(str::to_string), request.clone()));

        if self.should_panic {
            panic!("mock planner panic");
        }
        if self.should_fail {
            return Err(PlannerError::Status { status: 500 });
        }
        Ok(self.reply.clone())
    }
}
