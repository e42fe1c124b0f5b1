use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{VerifyError, VerifyResult};
use crate::models::backend::BackendKind;
use crate::models::job::JobOutcome;
use crate::models::label::ReferenceFields;
use crate::models::verification::{JobAccepted, JobView, ValidationResult};
use crate::services::intake;

/// Loose form fields accepted in place of a `ground_truth` JSON document.
const REFERENCE_FIELDS: [&str; 7] = [
    "brand_name",
    "class_type",
    "product_type",
    "abv",
    "net_contents",
    "bottler",
    "product_category",
];

/// Parsed `multipart/form-data` body of a verify request.
struct VerifyUpload {
    filename: String,
    image: Bytes,
    reference: Option<ReferenceFields>,
    backend: Option<BackendKind>,
}

pub(crate) fn parse_backend(raw: &str) -> VerifyResult<Option<BackendKind>> {
    match raw.trim() {
        "" | "auto" => Ok(None),
        name => name
            .parse::<BackendKind>()
            .map(Some)
            .map_err(|_| VerifyError::InvalidInput(format!("unknown OCR backend {name:?}, expected tesseract or ollama"))),
    }
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> VerifyError {
    VerifyError::InvalidInput(format!("malformed multipart body: {}", err.body_text()))
}

async fn read_upload(mut multipart: Multipart) -> VerifyResult<VerifyUpload> {
    let mut image: Option<(String, Bytes)> = None;
    let mut ground_truth: Option<String> = None;
    let mut loose = serde_json::Map::new();
    let mut backend = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await.map_err(bad_multipart)?;
                image = Some((filename, data));
            }
            "ground_truth" | "reference" => {
                ground_truth = Some(field.text().await.map_err(bad_multipart)?);
            }
            "ocr_backend" | "backend" => {
                backend = parse_backend(&field.text().await.map_err(bad_multipart)?)?;
            }
            other if REFERENCE_FIELDS.contains(&other) => {
                let value = field.text().await.map_err(bad_multipart)?;
                loose.insert(other.to_string(), serde_json::Value::String(value));
            }
            _ => {
                tracing::debug!(field = %name, "ignoring unknown form field");
            }
        }
    }

    let (filename, image) = image.ok_or_else(|| VerifyError::InvalidInput("missing image field".into()))?;

    let reference = match ground_truth {
        Some(json) => intake::parse_reference(Some(&json))?,
        None if !loose.is_empty() => {
            let reference = ReferenceFields::from_value(serde_json::Value::Object(loose))
                .map_err(|e| VerifyError::InvalidInput(e.to_string()))?;
            (!reference.is_empty()).then_some(reference)
        }
        None => None,
    };

    Ok(VerifyUpload {
        filename,
        image,
        reference,
        backend,
    })
}

/// 503 unless the snapshot can serve `requested` (or, when `None`, any backend).
fn ensure_backend(state: &AppState, requested: Option<BackendKind>) -> VerifyResult<()> {
    let snapshot = state.health.snapshot();
    if snapshot.resolve(requested, state.config.default_backend).is_some() {
        return Ok(());
    }
    let backend = requested.map_or_else(|| "no extraction backend".to_string(), |b| b.to_string());
    Err(VerifyError::BackendUnavailable {
        backend,
        retry_after_secs: state.config.health_probe_interval_secs,
    })
}

/// POST /verify: validate, queue, and block until the job is terminal.
///
/// An explicitly requested backend that is currently down fails fast with 503:
/// a blocking caller has no way to collect a result later.
pub async fn verify_sync(
    State(state): State<AppState>,
    multipart: Multipart,
) -> VerifyResult<Json<ValidationResult>> {
    let upload = read_upload(multipart).await?;
    let input = intake::prepare(
        &state.vault,
        &upload.filename,
        &upload.image,
        upload.reference,
        state.config.max_file_size_bytes(),
    )?;

    ensure_backend(&state, upload.backend)?;

    let job = state.store.submit(input, upload.backend);
    let job = state
        .store
        .wait_terminal(job.id, state.config.sync_timeout())
        .await?;

    match job.result {
        Some(JobOutcome::Completed(result)) => Ok(Json(*result)),
        Some(JobOutcome::Failed { error }) => Err(VerifyError::from_record(
            &error,
            state.config.health_probe_interval_secs,
        )),
        None => Err(VerifyError::ValidationInternalError(format!(
            "job {} ended without a result",
            job.id
        ))),
    }
}

/// POST /verify/async: validate and queue; returns 202 with the job id.
///
/// Without a named backend the job is accepted even while every backend is down.
pub async fn verify_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> VerifyResult<(StatusCode, Json<JobAccepted>)> {
    let upload = read_upload(multipart).await?;
    let input = intake::prepare(
        &state.vault,
        &upload.filename,
        &upload.image,
        upload.reference,
        state.config.max_file_size_bytes(),
    )?;

    // a named backend that is down refuses the job; otherwise it waits in the queue
    if upload.backend.is_some() {
        ensure_backend(&state, upload.backend)?;
    }
    let job = state.store.submit(input, upload.backend);
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::from(&job))))
}

/// GET /verify/async/{job_id}: current job state, with the result once terminal.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> VerifyResult<Json<JobView>> {
    let job = state.store.get(job_id)?;
    Ok(Json(JobView::from(&job)))
}

/// POST /verify/retry/{job_id}: re-enqueue a failed job with its stored image.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> VerifyResult<(StatusCode, Json<JobAccepted>)> {
    let job = state.store.retry(job_id)?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::from(&job))))
}
