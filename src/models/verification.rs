use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::ErrorRecord;
use crate::models::backend::BackendKind;
use crate::models::job::{Job, JobKind, JobOutcome, JobState};
use crate::models::label::{ExtractedFields, ProductCategory};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Compliant,
    NonCompliant,
    /// No failures, but at least one accuracy check could not run.
    PartialValidation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationLevel {
    StructuralOnly,
    PartialAccuracy,
    FullValidation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Structural,
    Accuracy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoReferenceValue,
}

/// Outcome of one executed check. Checks that did not run are [`SkippedCheck`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCheck {
    pub field: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ProductCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_inferred: Option<bool>,
}

impl FieldCheck {
    pub fn new(field: &str, valid: bool, actual: Option<String>) -> Self {
        Self {
            field: field.to_string(),
            valid,
            expected: None,
            actual,
            error: None,
            similarity_score: None,
            threshold: None,
            tolerance: None,
            category: None,
            category_inferred: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub field: String,
    pub tier: Tier,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCheck {
    pub field: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TierResults {
    pub structural: Vec<FieldCheck>,
    pub accuracy: Vec<FieldCheck>,
}

/// Full report for one label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub status: ComplianceStatus,
    pub validation_level: ValidationLevel,
    pub extracted_fields: ExtractedFields,
    pub validation_results: TierResults,
    pub violations: Vec<Violation>,
    pub skipped: Vec<SkippedCheck>,
    pub skipped_count: usize,
    pub warnings: Vec<String>,
    pub processing_time_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ValidationResult {
    pub fn violations_in(&self, tier: Tier) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.tier == tier)
    }
}

/// Response for `POST /verify/async` and `POST /verify/retry/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: Uuid,
    pub state: JobState,
    pub attempt_count: u32,
    pub status_url: String,
}

impl From<&Job> for JobAccepted {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            attempt_count: job.attempt_count,
            status_url: format!("/verify/async/{}", job.id),
        }
    }
}

/// Public view of a job, returned by `GET /verify/async/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub filename: String,
    pub state: JobState,
    pub backend_requested: Option<BackendKind>,
    pub backend_used: Option<BackendKind>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Errors recorded so far in the current attempt cycle, e.g. while `RETRYING`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    pub previous_attempts: Vec<JobOutcome>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let (result, error) = match &job.result {
            Some(JobOutcome::Completed(r)) => (Some((**r).clone()), None),
            Some(JobOutcome::Failed { error }) => (None, Some(error.clone())),
            None => (None, None),
        };
        Self {
            job_id: job.id,
            kind: job.kind,
            batch_id: job.batch_id,
            filename: job.input.filename.clone(),
            state: job.state,
            backend_requested: job.backend_requested,
            backend_used: job.backend_used,
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result,
            error,
            last_error: if job.result.is_none() { job.last_error.clone() } else { None },
            previous_attempts: job.history.clone(),
        }
    }
}

/// Response for `POST /verify/batch`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchAccepted {
    pub batch_id: Uuid,
    pub total: usize,
    pub queued: usize,
    pub rejected: usize,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemView {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub compliant: usize,
    pub non_compliant: usize,
    pub partial: usize,
    pub errors: usize,
    pub pending: usize,
    pub total_processing_time_seconds: f64,
}

impl BatchSummary {
    pub fn tally(items: &[BatchItemView]) -> Self {
        let mut summary = BatchSummary {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match (&item.result, &item.error) {
                (Some(result), _) => {
                    summary.completed += 1;
                    summary.total_processing_time_seconds += result.processing_time_seconds;
                    match result.status {
                        ComplianceStatus::Compliant => summary.compliant += 1,
                        ComplianceStatus::NonCompliant => summary.non_compliant += 1,
                        ComplianceStatus::PartialValidation => summary.partial += 1,
                    }
                }
                (None, Some(_)) if item.state == JobState::Failed => summary.errors += 1,
                _ => summary.pending += 1,
            }
        }
        summary
    }
}

/// Response for `GET /verify/batch/{id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchView {
    pub batch_id: Uuid,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub items: Vec<BatchItemView>,
    pub summary: BatchSummary,
}
