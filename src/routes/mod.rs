pub mod batch;
pub mod health;
pub mod metrics;
pub mod verify;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Headroom for multipart boundaries and text fields around the file payload.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Build the HTTP surface. `/metrics` is mounted only when a recorder handle is given.
pub fn build_router(state: AppState, prometheus: Option<PrometheusHandle>) -> Router {
    let single_limit = state.config.max_file_size_bytes() + FORM_OVERHEAD;
    let batch_limit = state.config.max_file_size_bytes() * state.config.max_batch_size + FORM_OVERHEAD;

    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/verify",
            post(verify::verify_sync).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/verify/async",
            post(verify::verify_async).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route("/verify/async/{job_id}", get(verify::job_status))
        .route("/verify/retry/{job_id}", post(verify::retry_job))
        .route(
            "/verify/batch",
            post(batch::submit_batch).layer(DefaultBodyLimit::max(batch_limit)),
        )
        .route("/verify/batch/{job_id}", get(batch::batch_status))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(batch_limit))
}
