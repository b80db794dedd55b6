//! HTTP front end of the mirror

use crate::error::{MirrorError, Result};
use crate::mirror::Mirror;
use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Every path goes to the mirror, which answers non-API paths itself
pub fn build_router(mirror: Arc<Mirror>) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(mirror)
        .layer(TraceLayer::new_for_http())
}

async fn handle(State(mirror): State<Arc<Mirror>>, request: Request) -> Response {
    mirror.handle(request).await
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Listening for connections");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| MirrorError::Http(format!("Server error: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
