//! The proxy's accept loop: one listener, one `hyper` service per
//! connection, dispatching every request through the mode-aware pipeline.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::network::connection_pool::ConnectionPool;
use crate::network::websocket::is_upgrade_request;
use crate::proxy;
use crate::Result;

/// Graceful-shutdown grace period given to in-flight connections.
pub const SHUTDOWN_GRACE_MS: u64 = 200;

/// Bind `addr` and serve requests through `engine` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the listener fails to bind.
pub async fn run(engine: Arc<Engine>, addr: SocketAddr, pool: Arc<ConnectionPool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("ouli listening on {addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let Some(guard) = pool.try_acquire() else {
                    warn!("connection limit reached, dropping connection from {peer}");
                    continue;
                };

                let engine = Arc::clone(&engine);
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    let _guard = guard;
                    let service = service_fn(move |req: Request<Incoming>| {
                        let engine = Arc::clone(&engine);
                        async move { handle(engine, req, peer).await }
                    });

                    if let Err(e) = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        warn!("connection from {peer} ended with error: {e}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, draining connections");
                break;
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_MS)).await;
    Ok(())
}

async fn handle(
    engine: Arc<Engine>,
    req: Request<Incoming>,
    peer: SocketAddr,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if is_upgrade_request(&req) {
        return Ok(proxy::websocket::handle_upgrade(engine, req).await);
    }

    Ok(proxy::http::handle(engine, req, peer).await)
}
