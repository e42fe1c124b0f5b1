//! Job lifecycle through the store and real workers, with scripted backends.

mod fixtures;
mod helpers;

use std::time::Duration;

use fixtures::{wine_label, wine_reference, HEFEWEIZEN_LABEL, PNG, RIDGE_REFERENCE};
use helpers::{Harness, Step};
use label_verifier::error::ErrorKind;
use label_verifier::models::backend::BackendKind;
use label_verifier::models::job::{JobOutcome, JobState};
use label_verifier::models::verification::{ComplianceStatus, Tier, ValidationLevel, ValidationResult};
use label_verifier::services::intake;
use label_verifier::services::store::StoreError;

fn submit(harness: &Harness, reference: Option<&str>, backend: Option<BackendKind>) -> uuid::Uuid {
    let state = &harness.state;
    let reference = intake::parse_reference(reference).unwrap();
    let input = intake::prepare(&state.vault, "label.png", PNG, reference, 1024 * 1024).unwrap();
    state.store.submit(input, backend).id
}

fn completed(outcome: &Option<JobOutcome>) -> &ValidationResult {
    match outcome {
        Some(JobOutcome::Completed(result)) => result,
        other => panic!("expected a completed job, got {other:?}"),
    }
}

#[tokio::test]
async fn test_compliant_label_end_to_end() {
    let mut harness = Harness::new(true, true).await;
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, Some(&wine_reference()), None);
    let job = harness.wait(id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.backend_used, Some(BackendKind::Tesseract));
    let result = completed(&job.result);
    assert_eq!(result.status, ComplianceStatus::Compliant, "{:#?}", result.violations);
    assert_eq!(result.validation_level, ValidationLevel::FullValidation);
    assert_eq!(result.skipped_count, 0);
    assert_eq!(result.backend, Some(BackendKind::Tesseract));
}

#[tokio::test]
async fn test_brand_mismatch_is_non_compliant() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.answer(HEFEWEIZEN_LABEL);
    harness.spawn_workers(1);

    let id = submit(&harness, Some(RIDGE_REFERENCE), None);
    let job = harness.wait(id).await;
    let result = completed(&job.result);

    assert_eq!(result.status, ComplianceStatus::NonCompliant);
    let accuracy: Vec<_> = result.violations_in(Tier::Accuracy).collect();
    assert_eq!(accuracy.len(), 1);
    assert_eq!(accuracy[0].field, "brand_name");

    let brand = result
        .validation_results
        .accuracy
        .iter()
        .find(|c| c.field == "brand_name")
        .unwrap();
    assert!((brand.similarity_score.unwrap() - 0.095).abs() < 0.001);
    let abv = result.validation_results.accuracy.iter().find(|c| c.field == "abv").unwrap();
    assert!(abv.valid);
}

#[tokio::test]
async fn test_no_reference_is_partial_validation() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;
    let result = completed(&job.result);

    assert_eq!(result.status, ComplianceStatus::PartialValidation);
    assert_eq!(result.validation_level, ValidationLevel::StructuralOnly);
    assert_eq!(result.skipped_count, 6);
    assert!(result.violations.is_empty());
}

#[tokio::test]
async fn test_timeouts_retry_until_success() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.then(Step::Timeout);
    harness.tesseract.then(Step::Unreachable);
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 3);
    assert_eq!(harness.tesseract.calls(), 3);
}

#[tokio::test]
async fn test_attempt_cap_preserves_last_error() {
    let mut harness = Harness::new(true, false).await;
    for _ in 0..3 {
        harness.tesseract.then(Step::Timeout);
    }
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt_count, 3);
    match &job.result {
        Some(JobOutcome::Failed { error }) => {
            assert_eq!(error.kind, ErrorKind::ExtractionTimeout);
            assert_eq!(error.attempt, 3);
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_image_fails_without_retry() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.then(Step::Reject);
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(harness.tesseract.calls(), 1);
    assert!(matches!(
        &job.result,
        Some(JobOutcome::Failed { error }) if error.kind == ErrorKind::InvalidInput && !error.recoverable
    ));
}

#[tokio::test]
async fn test_extraction_failure_is_retried_once() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.then(Step::Failure);
    harness.tesseract.then(Step::Failure);
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempt_count, 2);
    assert_eq!(harness.tesseract.calls(), 2);
}

#[tokio::test]
async fn test_manual_retry_reuses_stored_image() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.then(Step::Reject);
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    assert_eq!(harness.wait(id).await.state, JobState::Failed);

    let retried = harness.state.store.retry(id).unwrap();
    assert_eq!(retried.id, id);
    assert_eq!(retried.state, JobState::Queued);

    let job = harness.wait(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempt_count, 2);
    assert_eq!(job.history.len(), 1);
}

#[tokio::test]
async fn test_retry_of_completed_job_is_rejected() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let before = harness.wait(id).await;

    let err = harness.state.store.retry(id).unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition(_)));
    let after = harness.state.store.get(id).unwrap();
    assert_eq!(after.state, JobState::Completed);
    assert_eq!(after.updated_at, before.updated_at);
}

#[tokio::test]
async fn test_job_waits_for_requested_backend() {
    let mut harness = Harness::new(true, false).await;
    harness.ollama.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, Some(BackendKind::Ollama));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.state.store.get(id).unwrap().state, JobState::Queued);
    assert_eq!(harness.ollama.calls(), 0);

    harness.ollama.up.store(true, std::sync::atomic::Ordering::SeqCst);
    harness.state.health.refresh().await;

    let job = harness.wait(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.backend_used, Some(BackendKind::Ollama));
}

#[tokio::test]
async fn test_default_backend_falls_back_when_down() {
    let mut harness = Harness::new(false, true).await;
    harness.ollama.answer(&wine_label());
    harness.spawn_workers(1);

    let id = submit(&harness, None, None);
    let job = harness.wait(id).await;
    assert_eq!(job.backend_used, Some(BackendKind::Ollama));
    assert_eq!(harness.tesseract.calls(), 0);
}

#[tokio::test]
async fn test_many_workers_process_each_job_once() {
    let mut harness = Harness::new(true, false).await;
    harness.tesseract.answer(&wine_label());
    harness.spawn_workers(4);

    let ids: Vec<_> = (0..20).map(|_| submit(&harness, None, None)).collect();
    let jobs = futures::future::join_all(ids.iter().map(|id| harness.wait(*id))).await;

    assert!(jobs.iter().all(|j| j.state == JobState::Completed && j.attempt_count == 1));
    assert_eq!(harness.tesseract.calls(), 20);
}
