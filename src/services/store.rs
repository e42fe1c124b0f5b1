//! In-memory job store: the only place job state changes.
//!
//! Every mutation goes through [`JobStore::transition`], which applies a
//! [`Transition`] to the current job value and swaps in the successor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{ErrorRecord, VerifyError};
use crate::models::backend::BackendKind;
use crate::models::job::{
    Batch, BatchItem, InvalidStateTransition, Job, JobInput, JobKind, JobOutcome, JobState,
    Transition,
};
use crate::models::verification::{BatchItemView, BatchSummary, BatchView, ValidationResult};
use crate::services::queue::{JobQueue, Pick};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidStateTransition),

    #[error("job {0} did not reach a terminal state in time")]
    WaitElapsed(Uuid),
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => VerifyError::NotFound(id),
            StoreError::InvalidTransition(e) => VerifyError::InvalidStateTransition(e),
            StoreError::WaitElapsed(job_id) => VerifyError::SyncWaitElapsed { job_id },
        }
    }
}

/// One archive entry after intake: either a job input or the reason it was refused.
#[derive(Debug)]
pub enum BatchEntry {
    Accepted(JobInput),
    Rejected { filename: String, error: ErrorRecord },
}

pub struct JobStore {
    jobs: DashMap<Uuid, Job>,
    batches: DashMap<Uuid, Batch>,
    queue: JobQueue,
    /// Bumped on every change so waiters can re-check without polling.
    version: watch::Sender<u64>,
    max_attempts: u32,
    retention: chrono::Duration,
}

impl JobStore {
    pub fn new(max_attempts: u32, retention: Duration) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            jobs: DashMap::new(),
            batches: DashMap::new(),
            queue: JobQueue::new(),
            version,
            max_attempts,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn changed(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        metrics::gauge!("verification_queue_depth").set(self.queue.len() as f64);
    }

    fn insert_queued(&self, job: Job) {
        let id = job.id;
        self.jobs.insert(id, job);
        self.queue.push(id);
        metrics::counter!("verification_jobs_total").increment(1);
    }

    /// Create a queued job. Never waits on extraction.
    pub fn submit(&self, input: JobInput, backend_requested: Option<BackendKind>) -> Job {
        let job = Job::new(JobKind::Single, None, input, backend_requested, Utc::now());
        tracing::info!(job_id = %job.id, filename = %job.input.filename, backend = ?backend_requested, "job queued");
        self.insert_queued(job.clone());
        self.changed();
        job
    }

    /// Create a batch and one queued child job per accepted entry, in order.
    pub fn submit_batch(&self, entries: Vec<BatchEntry>, backend_requested: Option<BackendKind>) -> Batch {
        let now = Utc::now();
        let batch_id = Uuid::new_v4();
        let mut items = Vec::with_capacity(entries.len());
        let mut children = Vec::new();

        for entry in entries {
            match entry {
                BatchEntry::Accepted(input) => {
                    let filename = input.filename.clone();
                    let job = Job::new(JobKind::BatchItem, Some(batch_id), input, backend_requested, now);
                    items.push(BatchItem {
                        filename,
                        job_id: Some(job.id),
                        rejection: None,
                    });
                    children.push(job);
                }
                BatchEntry::Rejected { filename, error } => items.push(BatchItem {
                    filename,
                    job_id: None,
                    rejection: Some(error),
                }),
            }
        }

        let batch = Batch {
            id: batch_id,
            items,
            created_at: now,
        };
        // parent first, so eviction never sees a child without its batch
        self.batches.insert(batch_id, batch.clone());
        let queued = children.len();
        for job in children {
            self.insert_queued(job);
        }
        metrics::counter!("verification_batches_total").increment(1);
        tracing::info!(
            batch_id = %batch_id,
            total = batch.items.len(),
            queued,
            "batch queued"
        );
        self.changed();
        batch
    }

    pub fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .get(&id)
            .map(|job| job.clone())
            .ok_or(StoreError::NotFound(id))
    }

    /// Apply one transition atomically with respect to other writers of the same job.
    pub fn transition(&self, id: Uuid, transition: Transition) -> Result<Job, StoreError> {
        let next = {
            let mut entry = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            let next = entry.apply(transition, Utc::now())?;
            *entry = next.clone();
            next
        };
        self.changed();
        Ok(next)
    }

    /// Hand the oldest claimable job to a worker, moving it to `PROCESSING`.
    ///
    /// `resolve` picks the backend for a job, or `None` to leave it queued.
    /// The queue lock is held across the claim, so at most one worker gets a job.
    pub fn claim_next(&self, resolve: impl Fn(&Job) -> Option<BackendKind>) -> Option<Job> {
        let mut claimed = None;
        self.queue.take_first(|id| {
            let Some(mut entry) = self.jobs.get_mut(&id) else {
                return Pick::Discard;
            };
            if entry.state != JobState::Queued {
                return Pick::Discard;
            }
            let Some(backend) = resolve(&entry) else {
                return Pick::Skip;
            };
            match entry.apply(Transition::Claim { backend }, Utc::now()) {
                Ok(next) => {
                    *entry = next.clone();
                    claimed = Some(next);
                    Pick::Take
                }
                Err(_) => Pick::Discard,
            }
        });

        if let Some(job) = &claimed {
            tracing::debug!(job_id = %job.id, backend = ?job.backend_used, attempt = job.attempt_count, "job claimed");
            self.changed();
        }
        claimed
    }

    pub fn complete(&self, id: Uuid, result: ValidationResult) -> Result<Job, StoreError> {
        let status = result.status;
        let job = self.transition(id, Transition::Complete(Box::new(result)))?;
        metrics::counter!("verification_jobs_completed").increment(1);
        tracing::info!(job_id = %id, status = %status, attempt = job.attempt_count, "job completed");
        Ok(job)
    }

    pub fn fail(&self, id: Uuid, error: ErrorRecord) -> Result<Job, StoreError> {
        let job = self.transition(id, Transition::Fail(error.clone()))?;
        metrics::counter!("verification_jobs_failed").increment(1);
        tracing::error!(
            job_id = %id,
            kind = %error.kind,
            attempt = error.attempt,
            error = %error.message,
            "job failed"
        );
        Ok(job)
    }

    /// Park a job in `RETRYING` after a recoverable error.
    pub fn defer(&self, id: Uuid, error: ErrorRecord) -> Result<Job, StoreError> {
        let job = self.transition(id, Transition::Defer(error.clone()))?;
        tracing::warn!(
            job_id = %id,
            kind = %error.kind,
            attempt = error.attempt,
            error = %error.message,
            "job will be retried"
        );
        Ok(job)
    }

    /// Leave `RETRYING`: back to the queue, or `FAILED` once the attempt cap is reached.
    pub fn requeue(&self, id: Uuid) -> Result<Job, StoreError> {
        let job = self.transition(
            id,
            Transition::Requeue {
                max_attempts: self.max_attempts,
            },
        )?;
        match job.state {
            JobState::Queued => {
                self.queue.push(id);
                metrics::counter!("verification_jobs_retried").increment(1);
                tracing::info!(job_id = %id, attempt = job.attempt_count, "job requeued");
                self.changed();
            }
            _ => {
                metrics::counter!("verification_jobs_failed").increment(1);
                tracing::error!(job_id = %id, attempts = job.attempt_count, "job failed after max attempts");
            }
        }
        Ok(job)
    }

    /// Explicit retry of a `FAILED` job; re-enqueues the stored image.
    pub fn retry(&self, id: Uuid) -> Result<Job, StoreError> {
        let job = self.transition(id, Transition::Retry)?;
        self.queue.push(id);
        metrics::counter!("verification_jobs_retried").increment(1);
        tracing::info!(job_id = %id, attempt = job.attempt_count, "job retry requested");
        self.changed();
        Ok(job)
    }

    /// Wait until the job is terminal or `timeout` elapses. The job keeps
    /// running either way.
    pub async fn wait_terminal(&self, id: Uuid, timeout: Duration) -> Result<Job, StoreError> {
        let mut changes = self.version.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.get(id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                _ => return Err(StoreError::WaitElapsed(id)),
            }
        }
    }

    pub fn batch(&self, id: Uuid) -> Result<BatchView, StoreError> {
        let batch = self
            .batches
            .get(&id)
            .map(|b| b.clone())
            .ok_or(StoreError::NotFound(id))?;

        let items: Vec<BatchItemView> = batch.items.iter().map(|item| self.item_view(item)).collect();
        let state = derive_batch_state(&items);
        let summary = BatchSummary::tally(&items);

        Ok(BatchView {
            batch_id: batch.id,
            state,
            created_at: batch.created_at,
            items,
            summary,
        })
    }

    fn item_view(&self, item: &BatchItem) -> BatchItemView {
        let mut view = BatchItemView {
            filename: item.filename.clone(),
            job_id: item.job_id,
            state: JobState::Failed,
            result: None,
            error: item.rejection.clone(),
        };
        let Some(job_id) = item.job_id else {
            return view;
        };
        match self.jobs.get(&job_id) {
            Some(job) => {
                view.state = job.state;
                match &job.result {
                    Some(JobOutcome::Completed(result)) => view.result = Some((**result).clone()),
                    Some(JobOutcome::Failed { error }) => view.error = Some(error.clone()),
                    None => view.error = job.last_error.clone(),
                }
            }
            None => view.error = Some(ErrorRecord::internal("job record no longer available", 0)),
        }
        view
    }

    /// Drop terminal jobs older than the retention window.
    ///
    /// Batch children go only together with their batch, once every child is
    /// terminal and past retention.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;

        let expired_batches: Vec<Uuid> = self
            .batches
            .iter()
            .filter(|batch| self.batch_expired(batch.value(), cutoff))
            .map(|batch| batch.id)
            .collect();

        let mut evicted = 0;
        for batch_id in expired_batches {
            if let Some((_, batch)) = self.batches.remove(&batch_id) {
                for job_id in batch.items.iter().filter_map(|i| i.job_id) {
                    if self.jobs.remove(&job_id).is_some() {
                        evicted += 1;
                    }
                }
                tracing::debug!(batch_id = %batch_id, "batch evicted");
            }
        }

        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| job.batch_id.is_some() || !(job.is_terminal() && job.updated_at < cutoff));
        evicted += before.saturating_sub(self.jobs.len());

        if evicted > 0 {
            tracing::info!(evicted, "expired jobs evicted");
            self.changed();
        }
        evicted
    }

    fn batch_expired(&self, batch: &Batch, cutoff: DateTime<Utc>) -> bool {
        batch.items.iter().all(|item| match item.job_id {
            None => batch.created_at < cutoff,
            Some(job_id) => self
                .jobs
                .get(&job_id)
                .map_or(true, |job| job.is_terminal() && job.updated_at < cutoff),
        })
    }
}

/// Batch state is never stored: it is read off the children.
pub fn derive_batch_state(items: &[BatchItemView]) -> JobState {
    if items.iter().all(|i| i.state.is_terminal()) {
        if items.iter().any(|i| i.result.is_some()) {
            JobState::Completed
        } else {
            JobState::Failed
        }
    } else if items.iter().any(|i| i.state != JobState::Queued) {
        JobState::Processing
    } else {
        JobState::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::extractor::{extract_fields, GOVERNMENT_WARNING_TEXT};
    use crate::services::validation::validate;
    use crate::services::vault::ImageVault;
    use std::sync::Arc;

    fn input(name: &str) -> JobInput {
        JobInput {
            filename: name.into(),
            format: image::ImageFormat::Png,
            image: ImageVault::ephemeral().seal(b"png").unwrap(),
            reference: None,
        }
    }

    fn store() -> JobStore {
        JobStore::new(3, Duration::from_secs(3600))
    }

    fn any_backend(_: &Job) -> Option<BackendKind> {
        Some(BackendKind::Tesseract)
    }

    /// Structurally clean label with no reference: partial validation.
    fn result() -> ValidationResult {
        let label = format!(
            "STONE CREEK\nCabernet Sauvignon\n13.5% alc./vol.\n750 mL\n\
             Bottled by Stone Creek Cellars, Napa, CA\n{GOVERNMENT_WARNING_TEXT}"
        );
        validate(&extract_fields(&label), None, None)
    }

    fn timeout(attempt: u32) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::ExtractionTimeout, "slow", true, attempt)
    }

    #[test]
    fn test_submit_then_claim() {
        let store = store();
        let job = store.submit(input("a.png"), None);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(store.queue_depth(), 1);

        let claimed = store.claim_next(any_backend).unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::Processing);
        assert_eq!(store.get(job.id).unwrap().state, JobState::Processing);
        assert!(store.claim_next(any_backend).is_none());
    }

    #[test]
    fn test_job_waits_when_no_backend() {
        let store = store();
        let job = store.submit(input("a.png"), Some(BackendKind::Ollama));
        assert!(store.claim_next(|_| None).is_none());
        assert_eq!(store.get(job.id).unwrap().state, JobState::Queued);
        assert_eq!(store.queue_depth(), 1);
    }

    #[test]
    fn test_concurrent_claims_hand_out_each_job_once() {
        let store = Arc::new(store());
        for i in 0..50 {
            store.submit(input(&format!("{i}.png")), None);
        }
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(job) = store.claim_next(any_backend) {
                        mine.push(job.id);
                    }
                    mine
                })
            })
            .collect();
        let mut all: Vec<Uuid> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 50);
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn test_retry_rejected_unless_failed() {
        let store = store();
        let job = store.submit(input("a.png"), None);
        let err = store.retry(job.id).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        let after = store.get(job.id).unwrap();
        assert_eq!(after.state, JobState::Queued);
        assert_eq!(after.updated_at, job.updated_at);
        assert_eq!(store.queue_depth(), 1);
    }

    #[test]
    fn test_requeue_until_exhausted_then_manual_retry() {
        let store = store();
        let id = store.submit(input("a.png"), None).id;
        for attempt in 1..=3 {
            store.claim_next(any_backend).unwrap();
            store.defer(id, timeout(attempt)).unwrap();
            let job = store.requeue(id).unwrap();
            if attempt < 3 {
                assert_eq!(job.state, JobState::Queued);
            } else {
                assert_eq!(job.state, JobState::Failed);
            }
        }
        assert_eq!(store.queue_depth(), 0);

        let retried = store.retry(id).unwrap();
        assert_eq!(retried.state, JobState::Queued);
        assert_eq!(retried.attempt_count, 4);
        assert_eq!(store.queue_depth(), 1);
    }

    #[test]
    fn test_missing_job() {
        let store = store();
        assert!(matches!(store.get(Uuid::new_v4()), Err(StoreError::NotFound(_))));
        assert!(matches!(store.retry(Uuid::new_v4()), Err(StoreError::NotFound(_))));
        tokio_test::assert_err!(store.batch(Uuid::new_v4()));
        tokio_test::assert_err!(store.complete(Uuid::new_v4(), result()));
    }

    #[tokio::test]
    async fn test_wait_terminal_wakes_on_completion() {
        let store = Arc::new(store());
        let id = store.submit(input("a.png"), None).id;
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_terminal(id, Duration::from_secs(5)).await })
        };
        store.claim_next(any_backend).unwrap();
        store.complete(id, result()).unwrap();
        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_wait_terminal_times_out() {
        let store = store();
        let id = store.submit(input("a.png"), None).id;
        let err = store.wait_terminal(id, Duration::from_millis(30)).await.unwrap_err();
        assert!(matches!(err, StoreError::WaitElapsed(e) if e == id));
    }

    #[test]
    fn test_eviction_respects_retention_and_batches() {
        let store = store();
        let single = store.submit(input("single.png"), None).id;
        let batch = store.submit_batch(
            vec![
                BatchEntry::Accepted(input("a.png")),
                BatchEntry::Accepted(input("b.png")),
                BatchEntry::Rejected {
                    filename: "c.gif".into(),
                    error: ErrorRecord::invalid_input("unsupported format"),
                },
            ],
            None,
        );
        let children: Vec<Uuid> = batch.items.iter().filter_map(|i| i.job_id).collect();

        // single and first child finish; second child still queued
        store.claim_next(|j| (j.id == single).then_some(BackendKind::Tesseract)).unwrap();
        store.complete(single, result()).unwrap();
        store.claim_next(|j| (j.id == children[0]).then_some(BackendKind::Tesseract)).unwrap();
        store.complete(children[0], result()).unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(store.evict_expired(Utc::now()), 0);
        assert_eq!(store.evict_expired(later), 1);
        assert!(store.get(single).is_err());
        // finished child is kept while its batch is still running
        assert!(store.get(children[0]).is_ok());

        store.claim_next(any_backend).unwrap();
        store.fail(children[1], ErrorRecord::invalid_input("corrupt image")).unwrap();
        assert_eq!(store.batch(batch.id).unwrap().state, JobState::Completed);
        assert_eq!(store.evict_expired(later), 2);
        assert!(store.batch(batch.id).is_err());
        assert_eq!(store.job_count(), 0);
    }

    #[test]
    fn test_batch_view_summary() {
        let store = store();
        let batch = store.submit_batch(
            vec![
                BatchEntry::Accepted(input("a.png")),
                BatchEntry::Rejected {
                    filename: "b.bmp".into(),
                    error: ErrorRecord::invalid_input("unsupported format"),
                },
            ],
            None,
        );
        let view = store.batch(batch.id).unwrap();
        assert_eq!(view.state, JobState::Processing);
        assert_eq!(view.summary.total, 2);
        assert_eq!(view.summary.errors, 1);
        assert_eq!(view.summary.pending, 1);

        let id = batch.items[0].job_id.unwrap();
        store.claim_next(any_backend).unwrap();
        store.complete(id, result()).unwrap();
        let view = store.batch(batch.id).unwrap();
        assert_eq!(view.state, JobState::Completed);
        assert_eq!(view.summary.completed, 1);
        assert_eq!(view.summary.partial, 1);
        assert_eq!(view.summary.non_compliant, 0);
        assert_eq!(view.summary.pending, 0);
    }

    #[test]
    fn test_all_rejected_batch_is_failed() {
        let store = store();
        let batch = store.submit_batch(
            vec![BatchEntry::Rejected {
                filename: "x.tiff".into(),
                error: ErrorRecord::invalid_input("unsupported format"),
            }],
            None,
        );
        assert_eq!(store.batch(batch.id).unwrap().state, JobState::Failed);
    }
}
