//! HTTP surface: webhook intake, config CRUD, stats and health probes

pub mod context;
pub mod handlers;
pub mod routes;

pub use context::AppContext;
pub use routes::routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve every route until `shutdown` resolves
///
/// Binds before flipping readiness, so `/ready` only reports 200 once the
/// listener accepts connections. Returns the bound address and the server
/// future.
pub fn bind(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), warp::Error> {
    let health = ctx.health.clone();
    let (bound, server) =
        warp::serve(routes(ctx)).try_bind_with_graceful_shutdown(addr, shutdown)?;

    health.set_ready(true);
    info!(address = %bound, "HTTP server listening");
    Ok((bound, server))
}
