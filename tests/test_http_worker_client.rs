//! HTTP worker client against wiremock workers
//!
//! Covers the JSON-RPC submission body, SSE stream consumption, error
//! envelopes and capability discovery.

use hookfan::worker::{HttpWorkerClient, TaskState, TaskSubmission, WorkerClient, WorkerError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect()
}

fn event_stream(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn test_streamed_task_completes_with_artifact() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"jsonrpc": "2.0", "id": "1", "result": {
            "kind": "status-update", "status": {"state": "working"}, "final": false
        }}),
        json!({"jsonrpc": "2.0", "id": "1", "result": {
            "kind": "artifact-update",
            "artifact": {"name": "summary", "parts": [{"kind": "text", "text": "Posted to #eng"}]}
        }}),
        json!({"jsonrpc": "2.0", "id": "1", "result": {
            "kind": "status-update", "status": {"state": "completed"}, "final": true
        }}),
    ]);

    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "message/stream",
            "params": {"message": {"role": "user", "parts": [{"kind": "text", "text": "Post summary"}]}}
        })))
        .respond_with(event_stream(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpWorkerClient::new();
    let task = TaskSubmission::new("Post summary");
    let run = client.send_task(&server.uri(), &task).await.unwrap();

    assert_eq!(run.task_id, task.task_id);
    assert_eq!(run.state, Some(TaskState::Completed));
    assert!(run.succeeded());
    assert_eq!(run.artifact_text(), "Posted to #eng");
    assert_eq!(run.events, 3);

    let raw = run.to_raw_result();
    assert_eq!(raw["status"]["state"], "completed");
    assert_eq!(raw["artifacts"][0]["name"], "summary");
}

#[tokio::test]
async fn test_failed_state_is_terminal_but_not_success() {
    let server = MockServer::start().await;
    let body = sse(&[json!({"jsonrpc": "2.0", "id": "1", "result": {
        "kind": "status-update",
        "status": {"state": "failed", "message": "repository not found"},
        "final": true
    }})]);
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let run = HttpWorkerClient::new()
        .send_task(&server.uri(), &TaskSubmission::new("File bug"))
        .await
        .unwrap();

    assert_eq!(run.state, Some(TaskState::Failed));
    assert!(!run.succeeded());
    assert_eq!(run.status_message.as_deref(), Some("repository not found"));
}

#[tokio::test]
async fn test_stream_without_terminal_state_is_incomplete() {
    let server = MockServer::start().await;
    let body = sse(&[json!({"jsonrpc": "2.0", "id": "1", "result": {
        "kind": "status-update", "status": {"state": "working"}, "final": false
    }})]);
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let result = HttpWorkerClient::new()
        .send_task(&server.uri(), &TaskSubmission::new("Post summary"))
        .await;

    match result {
        Err(WorkerError::IncompleteStream { last_state }) => {
            assert_eq!(last_state.as_deref(), Some("working"));
        }
        other => panic!("expected incomplete stream, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_envelope_is_rpc_error() {
    let server = MockServer::start().await;
    let body = sse(&[json!({"jsonrpc": "2.0", "id": "1", "error": {
        "code": -32603, "message": "internal worker error"
    }})]);
    Mock::given(method("POST"))
        .respond_with(event_stream(body))
        .mount(&server)
        .await;

    let result = HttpWorkerClient::new()
        .send_task(&server.uri(), &TaskSubmission::new("Post summary"))
        .await;

    assert!(matches!(result, Err(WorkerError::Rpc { code: -32603, .. })));
}

#[tokio::test]
async fn test_http_error_status_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let result = HttpWorkerClient::new()
        .send_task(&server.uri(), &TaskSubmission::new("Post summary"))
        .await;

    match result {
        Err(WorkerError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "overloaded");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_plain_json_task_snapshot_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "kind": "task",
                "status": {"state": "completed"},
                "artifacts": [{"parts": [{"kind": "text", "text": "done"}]}]
            }
        })))
        .mount(&server)
        .await;

    let run = HttpWorkerClient::new()
        .send_task(&server.uri(), &TaskSubmission::new("Post summary"))
        .await
        .unwrap();

    assert!(run.succeeded());
    assert_eq!(run.artifact_text(), "done");
}

#[tokio::test]
async fn test_capability_discovery_reads_agent_card() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/agent.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Slack poster",
            "description": "Posts messages to Slack channels",
            "skills": [
                {"name": "post", "examples": ["Post the summary to #eng"]},
                {"name": "dm", "examples": ["DM the on-call engineer"]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let capabilities = HttpWorkerClient::new()
        .fetch_capabilities(&server.uri())
        .await
        .unwrap();

    assert_eq!(capabilities.name, "Slack poster");
    assert_eq!(capabilities.description, "Posts messages to Slack channels");
    assert_eq!(
        capabilities.examples,
        vec!["Post the summary to #eng", "DM the on-call engineer"]
    );
}

#[tokio::test]
async fn test_capability_discovery_failure_is_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = HttpWorkerClient::new().fetch_capabilities(&server.uri()).await;
    assert!(matches!(result, Err(WorkerError::Status { status: 404, .. })));
}
