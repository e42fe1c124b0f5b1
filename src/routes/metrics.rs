use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: job, queue and backend metrics in the Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions once, before the first sample is recorded.
pub fn describe() {
    metrics::describe_counter!("verification_jobs_total", "Total verification jobs submitted");
    metrics::describe_counter!("verification_jobs_completed", "Verification jobs that produced a result");
    metrics::describe_counter!("verification_jobs_failed", "Verification jobs that ended in FAILED");
    metrics::describe_counter!("verification_jobs_retried", "Jobs sent back to the queue, automatically or on request");
    metrics::describe_counter!("verification_batches_total", "Batch uploads accepted");
    metrics::describe_histogram!(
        "verification_processing_seconds",
        "Extraction plus validation time for one job"
    );
    metrics::describe_gauge!("verification_queue_depth", "Jobs waiting in the queue");
    metrics::describe_gauge!(
        "extraction_backend_available",
        "1 when the backend passed its last health probe, else 0"
    );
}
