use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::error::ErrorRecord;
use crate::models::backend::BackendKind;
use crate::models::label::ReferenceFields;
use crate::models::verification::ValidationResult;
use crate::services::vault::SealedImage;

/// Lifecycle state of a verification job.
///
/// ```text
/// QUEUED --claim--> PROCESSING --complete--> COMPLETED
///                   PROCESSING --fail-----> FAILED
///                   PROCESSING --defer----> RETRYING --requeue--> QUEUED | FAILED
/// FAILED --retry--> QUEUED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Single,
    BatchItem,
}

/// Immutable job input, shared between the store and the worker holding a claim.
#[derive(Debug)]
pub struct JobInput {
    pub filename: String,
    pub format: image::ImageFormat,
    pub image: SealedImage,
    pub reference: Option<ReferenceFields>,
}

/// Terminal payload of one attempt cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JobOutcome {
    Completed(Box<ValidationResult>),
    Failed { error: ErrorRecord },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub batch_id: Option<Uuid>,
    pub state: JobState,
    pub input: Arc<JobInput>,
    pub backend_requested: Option<BackendKind>,
    pub backend_used: Option<BackendKind>,
    /// Set once on entering a terminal state; cleared only by [`Transition::Retry`].
    pub result: Option<JobOutcome>,
    pub last_error: Option<ErrorRecord>,
    /// Outcomes of earlier attempt cycles, oldest first.
    pub history: Vec<JobOutcome>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One edge of the state graph.
#[derive(Debug, Clone)]
pub enum Transition {
    Claim { backend: BackendKind },
    Complete(Box<ValidationResult>),
    Fail(ErrorRecord),
    Defer(ErrorRecord),
    Requeue { max_attempts: u32 },
    Retry,
}

impl Transition {
    pub fn action(&self) -> &'static str {
        match self {
            Transition::Claim { .. } => "claim",
            Transition::Complete(_) => "complete",
            Transition::Fail(_) => "fail",
            Transition::Defer(_) => "defer",
            Transition::Requeue { .. } => "requeue",
            Transition::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a job in state {from}")]
pub struct InvalidStateTransition {
    pub from: JobState,
    pub action: &'static str,
}

impl Job {
    pub fn new(
        kind: JobKind,
        batch_id: Option<Uuid>,
        input: JobInput,
        backend_requested: Option<BackendKind>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            batch_id,
            state: JobState::Queued,
            input: Arc::new(input),
            backend_requested,
            backend_used: None,
            result: None,
            last_error: None,
            history: Vec::new(),
            attempt_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one transition, returning the successor job. `self` is never modified,
    /// so a rejected transition leaves the stored job untouched.
    pub fn apply(&self, transition: Transition, now: DateTime<Utc>) -> Result<Job, InvalidStateTransition> {
        let invalid = InvalidStateTransition {
            from: self.state,
            action: transition.action(),
        };
        let mut next = self.clone();
        next.updated_at = now;

        match (self.state, transition) {
            (JobState::Queued, Transition::Claim { backend }) => {
                next.state = JobState::Processing;
                next.backend_used = Some(backend);
            }
            (JobState::Processing, Transition::Complete(result)) => {
                next.state = JobState::Completed;
                next.result = Some(JobOutcome::Completed(result));
            }
            (JobState::Processing, Transition::Fail(error)) => {
                next.state = JobState::Failed;
                next.last_error = Some(error.clone());
                next.result = Some(JobOutcome::Failed { error });
            }
            (JobState::Processing, Transition::Defer(error)) => {
                next.state = JobState::Retrying;
                next.last_error = Some(error);
            }
            (JobState::Retrying, Transition::Requeue { max_attempts }) => {
                if self.attempt_count < max_attempts {
                    next.state = JobState::Queued;
                    next.attempt_count += 1;
                } else {
                    let error = self.last_error.clone().unwrap_or_else(|| {
                        ErrorRecord::internal("retry budget exhausted", self.attempt_count)
                    });
                    next.state = JobState::Failed;
                    next.result = Some(JobOutcome::Failed { error });
                }
            }
            (JobState::Failed, Transition::Retry) => {
                next.state = JobState::Queued;
                next.attempt_count += 1;
                next.last_error = None;
                if let Some(previous) = next.result.take() {
                    next.history.push(previous);
                }
            }
            _ => return Err(invalid),
        }

        Ok(next)
    }
}

/// A batch owns an ordered list of items; its state is derived from its children.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    pub items: Vec<BatchItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub filename: String,
    pub job_id: Option<Uuid>,
    /// Set for items refused before a job was created.
    pub rejection: Option<ErrorRecord>,
}
