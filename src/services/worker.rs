//! Queue drainer: claim, extract, validate, commit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use image::ImageFormat;

use crate::app_state::AppState;
use crate::error::{ErrorKind, ErrorRecord};
use crate::models::backend::BackendKind;
use crate::models::job::Job;
use crate::models::label::ReferenceFields;
use crate::models::verification::ValidationResult;
use crate::services::extractor::extract_fields;
use crate::services::ocr::{BackendRegistry, OcrError};
use crate::services::store::JobStore;
use crate::services::validation::validate;
use crate::services::vault::VaultError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] OcrError),

    #[error("stored image could not be opened: {0}")]
    Vault(#[from] VaultError),

    #[error("validation task failed: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Map onto the job error taxonomy. `attempt` is the job's current attempt.
    pub fn to_record(&self, attempt: u32) -> ErrorRecord {
        let message = self.to_string();
        match self {
            PipelineError::Extraction(OcrError::Timeout { .. }) => {
                ErrorRecord::new(ErrorKind::ExtractionTimeout, message, true, attempt)
            }
            PipelineError::Extraction(OcrError::Transport { .. }) => {
                ErrorRecord::new(ErrorKind::BackendUnavailable, message, true, attempt)
            }
            // the same image gets one more try, then it is treated as hopeless
            PipelineError::Extraction(OcrError::Backend { .. } | OcrError::Parse { .. }) => {
                ErrorRecord::new(ErrorKind::ExtractionFailure, message, attempt <= 1, attempt)
            }
            PipelineError::Extraction(OcrError::Rejected { .. }) => {
                ErrorRecord::new(ErrorKind::InvalidInput, message, false, attempt)
            }
            PipelineError::Extraction(OcrError::NotConfigured(_))
            | PipelineError::Vault(_)
            | PipelineError::Internal(_) => ErrorRecord::internal(message, attempt),
        }
    }
}

/// Extract text with one backend, then run the field extractor and both
/// validation tiers off the async runtime.
pub async fn verify_image(
    registry: &BackendRegistry,
    backend: BackendKind,
    image: &[u8],
    format: ImageFormat,
    reference: Option<ReferenceFields>,
) -> Result<ValidationResult, PipelineError> {
    let started = Instant::now();
    let extracted = registry.extract(backend, image, format).await?;
    tracing::debug!(
        backend = %backend,
        chars = extracted.text.len(),
        confidence = extracted.confidence,
        "text extracted"
    );

    let confidence = extracted.confidence;
    let mut result = tokio::task::spawn_blocking(move || {
        let fields = extract_fields(&extracted.text);
        validate(&fields, reference.as_ref(), Some(confidence))
    })
    .await
    .map_err(|e| PipelineError::Internal(e.to_string()))?;

    let elapsed = started.elapsed().as_secs_f64();
    result.backend = Some(backend);
    result.processing_time_seconds = elapsed;
    metrics::histogram!("verification_processing_seconds", "backend" => backend.to_string()).record(elapsed);
    Ok(result)
}

/// Claim the oldest job whose backend is currently available.
pub fn claim_next(state: &AppState) -> Option<Job> {
    let snapshot = state.health.snapshot();
    let preferred = state.config.default_backend;
    state
        .store
        .claim_next(|job| snapshot.resolve(job.backend_requested, preferred))
}

/// Run one claimed job to its next state and commit it.
pub async fn process_job(state: &AppState, job: Job) {
    let Some(backend) = job.backend_used else {
        let error = ErrorRecord::internal("claimed job has no backend", job.attempt_count);
        if let Err(e) = state.store.fail(job.id, error) {
            tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
        }
        return;
    };

    tracing::info!(
        job_id = %job.id,
        filename = %job.input.filename,
        backend = %backend,
        attempt = job.attempt_count,
        "processing verification job"
    );

    let outcome = match state.vault.open(&job.input.image) {
        Ok(image) => {
            verify_image(
                &state.registry,
                backend,
                &image,
                job.input.format,
                job.input.reference.clone(),
            )
            .await
        }
        Err(e) => Err(PipelineError::from(e)),
    };

    let committed = match outcome {
        Ok(result) => state.store.complete(job.id, result).map(|_| ()),
        Err(err) => {
            let record = err.to_record(job.attempt_count);
            if record.recoverable {
                state.store.defer(job.id, record).map(|_| {
                    schedule_requeue(state.store.clone(), job.id, state.config.retry_backoff());
                })
            } else {
                state.store.fail(job.id, record).map(|_| ())
            }
        }
    };

    if let Err(e) = committed {
        tracing::error!(job_id = %job.id, error = %e, "failed to commit job outcome");
    }
}

fn schedule_requeue(store: Arc<JobStore>, job_id: uuid::Uuid, backoff: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(backoff).await;
        if let Err(e) = store.requeue(job_id) {
            tracing::warn!(job_id = %job_id, error = %e, "requeue skipped");
        }
    });
}

/// Process the next job from the queue.
/// Returns true if a job was processed, false if nothing was claimable.
pub async fn process_next_job(state: &AppState) -> bool {
    match claim_next(state) {
        Some(job) => {
            process_job(state, job).await;
            true
        }
        None => false,
    }
}

/// Drain the queue forever. Idle workers wake on a new job or after the poll
/// interval, which also picks up jobs that were waiting for a backend.
pub async fn run_worker(state: AppState, worker_id: usize) {
    let poll = Duration::from_millis(state.config.worker_poll_interval_ms);
    tracing::info!(worker_id, "worker ready, starting job processing loop");

    loop {
        if process_next_job(&state).await {
            continue;
        }
        tracing::trace!(worker_id, "no claimable jobs, sleeping");
        tokio::select! {
            _ = state.store.queue().notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Periodically evict expired terminal jobs.
pub async fn run_janitor(store: Arc<JobStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick fires immediately; nothing can have expired yet
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = store.evict_expired(Utc::now());
        metrics::gauge!("verification_queue_depth").set(store.queue_depth() as f64);
        tracing::debug!(evicted, remaining = store.job_count(), "retention sweep finished");
    }
}
