use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use label_verifier::app_state::AppState;
use label_verifier::config::AppConfig;
use label_verifier::routes;
use label_verifier::services::worker;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        default_backend = %config.default_backend,
        workers = config.worker_count,
        "Initializing label verification server"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe();

    let state = AppState::from_config(config.clone()).expect("Failed to initialize image vault");

    // Health probing runs on its own schedule; requests only read the snapshot
    tokio::spawn(
        state
            .health
            .clone()
            .run(Duration::from_secs(config.health_probe_interval_secs)),
    );

    for worker_id in 0..config.worker_count {
        tokio::spawn(worker::run_worker(state.clone(), worker_id));
    }

    tokio::spawn(worker::run_janitor(
        state.store.clone(),
        Duration::from_secs(config.cleanup_interval_secs),
    ));

    let app = routes::build_router(state, Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
