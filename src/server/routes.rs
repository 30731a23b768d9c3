//! warp filter tree for the HTTP surface

use super::context::AppContext;
use super::handlers::{self, ErrorResponse};
use crate::http_span;
use crate::ledger::DeliverySource;
use crate::observability::health_routes;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

fn with_context(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// Request body exceeded [`MAX_BODY_BYTES`]
#[derive(Debug)]
pub struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

/// Request body could not be read off the connection
#[derive(Debug)]
pub struct BodyUnreadable;

impl warp::reject::Reject for BodyUnreadable {}

/// Buffered request body capped at [`MAX_BODY_BYTES`]
///
/// A declared `Content-Length` over the cap is refused up front. Chunked
/// bodies without the header are counted as they arrive.
fn body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and_then(|length: Option<u64>| async move {
            match length {
                Some(length) if length > MAX_BODY_BYTES => {
                    Err(warp::reject::custom(BodyTooLarge))
                }
                _ => Ok(()),
            }
        })
        .untuple_one()
        .and(warp::body::stream())
        .and_then(collect_body)
}

/// Drain a body stream into one buffer, refusing it once it passes the cap
pub async fn collect_body<S, B>(stream: S) -> Result<Bytes, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures::pin_mut!(stream);
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            debug!(error = %e, "Failed to read request body");
            warp::reject::custom(BodyUnreadable)
        })?;
        if (body.len() + chunk.remaining()) as u64 > MAX_BODY_BYTES {
            return Err(warp::reject::custom(BodyTooLarge));
        }
        body.put(chunk);
    }
    Ok(body.freeze())
}

/// Every route the service exposes
pub fn routes(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // POST /webhook/{id}
    let live_webhook = warp::path!("webhook" / String)
        .and(warp::post())
        .and(warp::any().map(|| DeliverySource::Live))
        .and(body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::receive_webhook);

    // POST /api/test/webhook/{id}
    let test_webhook = warp::path!("api" / "test" / "webhook" / String)
        .and(warp::post())
        .and(warp::any().map(|| DeliverySource::Test))
        .and(body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::receive_webhook);

    let list_webhooks = warp::path!("api" / "webhooks")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::list_webhooks);

    let create_webhook = warp::path!("api" / "webhooks")
        .and(warp::post())
        .and(body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::create_webhook);

    let get_webhook = warp::path!("api" / "webhooks" / String)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::get_webhook);

    let replace_webhook = warp::path!("api" / "webhooks" / String)
        .and(warp::put())
        .and(body())
        .and(with_context(ctx.clone()))
        .and_then(handlers::replace_webhook);

    let delete_webhook = warp::path!("api" / "webhooks" / String)
        .and(warp::delete())
        .and(with_context(ctx.clone()))
        .and_then(handlers::delete_webhook);

    let stats = warp::path!("api" / "stats")
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::get_stats);

    let invocation = warp::path!("api" / "stats" / "webhook" / String)
        .and(warp::get())
        .and(with_context(ctx.clone()))
        .and_then(handlers::get_invocation);

    let webhooks = live_webhook.or(test_webhook);
    let config = list_webhooks
        .or(create_webhook)
        .or(get_webhook)
        .or(replace_webhook)
        .or(delete_webhook);
    let stats = stats.or(invocation);

    webhooks
        .or(config)
        .or(stats)
        .or(health_routes(ctx.health.clone()))
        .recover(handle_rejection)
        .with(warp::cors().allow_any_origin())
        .with(warp::trace(|info| {
            http_span!(method = %info.method(), path = %info.path())
        }))
}

/// Map rejections from unmatched routes and body limits onto JSON errors
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if err.find::<BodyTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if err.find::<BodyUnreadable>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "Malformed request".to_string())
    } else {
        tracing::error!(rejection = ?err, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            success: false,
            error: message,
        }),
        status,
    ))
}
