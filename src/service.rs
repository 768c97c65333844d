use crate::metrics::{LoadMetrics, MetricsSnapshot};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use init4_bin_base::deps::tracing::error;
use std::{net::SocketAddr, sync::Arc};

/// Return a 404 Not Found response
pub async fn return_404() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

/// Return 200 if the last connectivity probe succeeded, 503 otherwise.
pub async fn healthcheck(State(metrics): State<Arc<LoadMetrics>>) -> Response {
    if metrics.is_connected() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "disconnected").into_response()
    }
}

/// Return the current counters.
pub async fn status(State(metrics): State<Arc<LoadMetrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Build the healthcheck and status router.
pub fn router(metrics: Arc<LoadMetrics>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .fallback(return_404)
        .with_state(metrics)
}

/// Serve the healthcheck and status endpoints on the given socket address.
pub fn serve_healthcheck(
    socket: impl Into<SocketAddr>,
    metrics: Arc<LoadMetrics>,
) -> tokio::task::JoinHandle<()> {
    let router = router(metrics);

    let addr = socket.into();
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, router).await {
                    error!(%err, "serve failed");
                }
            }
            Err(err) => {
                error!(%err, "failed to bind to the address");
            }
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthcheck_follows_connectivity() {
        let metrics = Arc::new(LoadMetrics::new());

        metrics.set_connected(false);
        let resp = healthcheck(State(metrics.clone())).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        metrics.set_connected(true);
        let resp = healthcheck(State(metrics.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let metrics = Arc::new(LoadMetrics::new());
        metrics.record_sent();
        metrics.record_failed();

        let Json(snapshot) = status(State(metrics)).await;
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.failed, 1);
    }
}
