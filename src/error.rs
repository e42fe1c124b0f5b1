//! Error taxonomy shared by the job pipeline and the HTTP surface.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::InvalidStateTransition;

/// Error classes a job can end with. Serialized into [`ErrorRecord::kind`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    BackendUnavailable,
    ExtractionTimeout,
    ExtractionFailure,
    ValidationInternalError,
}

/// What a failed job keeps as its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
    pub attempt: u32,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool, attempt: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
            attempt,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message, false, 0)
    }

    pub fn internal(message: impl Into<String>, attempt: u32) -> Self {
        Self::new(ErrorKind::ValidationInternalError, message, false, attempt)
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Bad format, oversize upload or malformed reference JSON. Never enqueued.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("extraction backend unavailable: {backend}")]
    BackendUnavailable { backend: String, retry_after_secs: u64 },

    #[error("extraction timed out: {0}")]
    ExtractionTimeout(String),

    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error(transparent)]
    InvalidStateTransition(#[from] InvalidStateTransition),

    #[error("internal validation error: {0}")]
    ValidationInternalError(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// Synchronous wait ran out; the job keeps running and can be polled.
    #[error("job {job_id} did not finish within the request timeout")]
    SyncWaitElapsed { job_id: Uuid },
}

impl VerifyError {
    pub fn status(&self) -> StatusCode {
        match self {
            VerifyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VerifyError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            VerifyError::ExtractionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            VerifyError::ExtractionFailure(_) => StatusCode::BAD_GATEWAY,
            VerifyError::InvalidStateTransition(_) => StatusCode::CONFLICT,
            VerifyError::ValidationInternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            VerifyError::NotFound(_) => StatusCode::NOT_FOUND,
            VerifyError::SyncWaitElapsed { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::InvalidInput(_) => "INVALID_INPUT",
            VerifyError::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            VerifyError::ExtractionTimeout(_) => "EXTRACTION_TIMEOUT",
            VerifyError::ExtractionFailure(_) => "EXTRACTION_FAILURE",
            VerifyError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            VerifyError::ValidationInternalError(_) => "VALIDATION_INTERNAL_ERROR",
            VerifyError::NotFound(_) => "NOT_FOUND",
            VerifyError::SyncWaitElapsed { .. } => "SYNC_TIMEOUT",
        }
    }
}

impl VerifyError {
    /// Map a failed job's stored error back onto the transport taxonomy.
    ///
    /// `retry_after_secs` is the hint sent with `BackendUnavailable`, normally
    /// the health probe interval.
    pub fn from_record(record: &ErrorRecord, retry_after_secs: u64) -> Self {
        let message = record.message.clone();
        match record.kind {
            ErrorKind::InvalidInput => VerifyError::InvalidInput(message),
            ErrorKind::BackendUnavailable => VerifyError::BackendUnavailable {
                backend: message,
                retry_after_secs,
            },
            ErrorKind::ExtractionTimeout => VerifyError::ExtractionTimeout(message),
            ErrorKind::ExtractionFailure => VerifyError::ExtractionFailure(message),
            ErrorKind::ValidationInternalError => VerifyError::ValidationInternalError(message),
        }
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        let retry_after = match &self {
            VerifyError::BackendUnavailable { retry_after_secs, .. } => {
                body["error"]["retry_after"] = json!(retry_after_secs);
                Some(*retry_after_secs)
            }
            VerifyError::SyncWaitElapsed { job_id } => {
                body["error"]["job_id"] = json!(job_id);
                body["error"]["status_url"] = json!(format!("/verify/async/{job_id}"));
                None
            }
            _ => None,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
