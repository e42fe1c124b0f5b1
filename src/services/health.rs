//! Background backend probing with a lock-free published snapshot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;

use crate::models::backend::{BackendHealth, BackendKind, HealthSnapshot};
use crate::services::ocr::BackendRegistry;

/// Sole writer of backend health. Readers get the current [`HealthSnapshot`]
/// with one atomic load and never wait on a probe.
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    snapshot: ArcSwap<HealthSnapshot>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<BackendRegistry>, probe_timeout: Duration) -> Self {
        let initial = HealthSnapshot::unprobed(registry.kinds());
        Self {
            registry,
            snapshot: ArcSwap::from_pointee(initial),
            probe_timeout,
        }
    }

    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.load_full()
    }

    /// Probe every backend concurrently and publish the result as one snapshot.
    pub async fn refresh(&self) -> Arc<HealthSnapshot> {
        let previous = self.snapshot.load_full();

        let probes = self.registry.kinds().into_iter().filter_map(|kind| {
            let extractor = self.registry.get(kind)?;
            let timeout = self.probe_timeout;
            Some(async move {
                let outcome = tokio::time::timeout(timeout, extractor.probe()).await;
                let checked = Utc::now();
                let health = match outcome {
                    Ok(Ok(())) => BackendHealth::up(checked),
                    Ok(Err(e)) => BackendHealth::down(e.to_string(), Some(checked)),
                    Err(_) => BackendHealth::down(
                        format!("probe timed out after {}s", timeout.as_secs_f64()),
                        Some(checked),
                    ),
                };
                (kind, health)
            })
        });

        let results = join_all(probes).await;
        let next = Arc::new(HealthSnapshot {
            backends: results.into_iter().collect(),
            refreshed_at: Some(Utc::now()),
        });

        for (kind, health) in &next.backends {
            let was_up = previous.is_available(*kind);
            metrics::gauge!("extraction_backend_available", "backend" => kind.to_string())
                .set(if health.available { 1.0 } else { 0.0 });

            match (was_up, health.available) {
                (false, true) => {
                    tracing::info!(backend = %kind, "extraction backend available");
                    self.spawn_warm_up(*kind);
                }
                (true, false) => tracing::warn!(
                    backend = %kind,
                    error = health.error.as_deref().unwrap_or("unknown"),
                    "extraction backend unavailable"
                ),
                _ => {}
            }
        }

        self.snapshot.store(next.clone());
        next
    }

    fn spawn_warm_up(&self, kind: BackendKind) {
        let Some(extractor) = self.registry.get(kind) else {
            return;
        };
        tokio::spawn(async move {
            match extractor.warm_up().await {
                Ok(()) => tracing::debug!(backend = %kind, "backend warmed up"),
                Err(e) => tracing::warn!(backend = %kind, error = %e, "backend warm-up failed"),
            }
        });
    }

    /// Refresh forever on a fixed interval. The first probe runs immediately.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = self.refresh().await;
            tracing::debug!(
                available = snapshot.available().len(),
                status = %snapshot.overall(),
                "health snapshot refreshed"
            );
        }
    }
}
