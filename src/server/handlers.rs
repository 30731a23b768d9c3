//! Request handlers
//!
//! Handlers never reject: every failure becomes a `{success:false, error}`
//! body with the status code of its [`ServiceError`].

use super::context::AppContext;
use crate::error::ServiceError;
use crate::ledger::DeliverySource;
use crate::webhook::registry::WebhookConfig;
use bytes::Bytes;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, warn};
use warp::http::StatusCode;
use warp::reply::{Reply, Response};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Render a service error as a JSON reply
pub fn error_reply(err: &ServiceError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        debug!(error = %err, "Request rejected");
    }

    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            success: false,
            error: err.public_message(),
        }),
        status,
    )
    .into_response()
}

fn json_reply<T: Serialize>(value: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

fn parse_config(body: &Bytes) -> Result<WebhookConfig, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::invalid_input(format!("invalid webhook config: {e}")))
}

/// `POST /webhook/{id}` and `POST /api/test/webhook/{id}`
pub async fn receive_webhook(
    webhook_id: String,
    source: DeliverySource,
    body: Bytes,
    ctx: Arc<AppContext>,
) -> Result<Response, Infallible> {
    Ok(match ctx.ingress.handle(&webhook_id, &body, source).await {
        Ok(acceptance) => json_reply(&acceptance, StatusCode::ACCEPTED),
        Err(e) => {
            if matches!(e, ServiceError::DuplicateDelivery { .. }) {
                warn!(webhook_id = %webhook_id, "Rejected duplicate delivery");
            }
            error_reply(&e)
        }
    })
}

/// `GET /api/webhooks`
pub async fn list_webhooks(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    let configs = ctx.registry.list().await;
    Ok(json_reply(&configs, StatusCode::OK))
}

/// `GET /api/webhooks/{id}`
pub async fn get_webhook(webhook_id: String, ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    Ok(match ctx.registry.get(&webhook_id).await {
        Some(config) => json_reply(&config, StatusCode::OK),
        None => error_reply(&ServiceError::config_not_found(webhook_id)),
    })
}

/// `POST /api/webhooks`
pub async fn create_webhook(body: Bytes, ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    let result = match parse_config(&body) {
        Ok(config) => ctx.registry.create(config).await,
        Err(e) => Err(e),
    };

    Ok(match result {
        Ok(config) => json_reply(&config, StatusCode::CREATED),
        Err(e) => error_reply(&e),
    })
}

/// `PUT /api/webhooks/{id}`; the path id wins over any id in the body
pub async fn replace_webhook(
    webhook_id: String,
    body: Bytes,
    ctx: Arc<AppContext>,
) -> Result<Response, Infallible> {
    let result = match parse_replacement(&webhook_id, &body) {
        Ok(config) => ctx.registry.replace(&webhook_id, config).await,
        Err(e) => Err(e),
    };

    Ok(match result {
        Ok(config) => json_reply(&config, StatusCode::OK),
        Err(e) => error_reply(&e),
    })
}

fn parse_replacement(webhook_id: &str, body: &Bytes) -> Result<WebhookConfig, ServiceError> {
    let mut value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ServiceError::invalid_input(format!("invalid webhook config: {e}")))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| ServiceError::invalid_input("webhook config must be a JSON object"))?;
    object.insert("id".to_string(), serde_json::Value::from(webhook_id));

    serde_json::from_value(value)
        .map_err(|e| ServiceError::invalid_input(format!("invalid webhook config: {e}")))
}

/// `DELETE /api/webhooks/{id}`
pub async fn delete_webhook(
    webhook_id: String,
    ctx: Arc<AppContext>,
) -> Result<Response, Infallible> {
    Ok(match ctx.registry.remove(&webhook_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_reply(&e),
    })
}

/// `GET /api/stats`
pub async fn get_stats(ctx: Arc<AppContext>) -> Result<Response, Infallible> {
    let stats = ctx.ledger.stats().await;
    Ok(json_reply(&stats, StatusCode::OK))
}

/// `GET /api/stats/webhook/{invocationId}`
pub async fn get_invocation(
    invocation_id: String,
    ctx: Arc<AppContext>,
) -> Result<Response, Infallible> {
    Ok(match ctx.ledger.get(&invocation_id).await {
        Some(invocation) => json_reply(&invocation, StatusCode::OK),
        None => error_reply(&ServiceError::Ledger(crate::ledger::LedgerError::NotFound(
            invocation_id,
        ))),
    })
}
