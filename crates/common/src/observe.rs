//! Metrics and health HTTP listener.
//!
//! Every component serves `GET /metrics` and `GET /healthz` on its own
//! port. The restreamer merges these routes into its main router instead
//! of running a second listener.

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::Metrics;

/// Build the observability router over a shared metrics registry.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Serve `/metrics` and `/healthz` until the token is cancelled.
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    token: CancellationToken,
) -> std::io::Result<()> {
    let app = router(metrics).layer(TraceLayer::new_for_http());
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Serving metrics");
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_endpoint_renders_registry() {
        let metrics = Arc::new(Metrics::new("test"));
        metrics.inc("requests_total", &[]);

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let app = router(metrics);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = reqwest::get(format!("http://{}/metrics", bound))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("test_requests_total 1"));
    }
}
