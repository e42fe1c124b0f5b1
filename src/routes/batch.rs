use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{VerifyError, VerifyResult};
use crate::models::verification::{BatchAccepted, BatchView};
use crate::routes::verify::parse_backend;
use crate::services::batch::{self, BatchLimits};
use crate::services::store::BatchEntry;

/// POST /verify/batch: ZIP of label images plus optional `<stem>.json` references.
pub async fn submit_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> VerifyResult<(StatusCode, Json<BatchAccepted>)> {
    let mut archive = None;
    let mut backend = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VerifyError::InvalidInput(e.body_text()))?
    {
        match field.name() {
            Some("batch_file") | Some("file") => {
                archive = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| VerifyError::InvalidInput(e.body_text()))?,
                );
            }
            Some("ocr_backend") | Some("backend") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| VerifyError::InvalidInput(e.body_text()))?;
                backend = parse_backend(&raw)?;
            }
            _ => {}
        }
    }

    let archive = archive.ok_or_else(|| VerifyError::InvalidInput("missing batch_file field".into()))?;
    let limits = BatchLimits {
        max_images: state.config.max_batch_size,
        max_image_bytes: state.config.max_file_size_bytes(),
    };

    // decompressing and sealing up to a few hundred MB is blocking work
    let vault = state.vault.clone();
    let entries = tokio::task::spawn_blocking(move || batch::unpack(&vault, &archive, limits))
        .await
        .map_err(|e| VerifyError::ValidationInternalError(e.to_string()))??;

    let rejected = entries
        .iter()
        .filter(|e| matches!(e, BatchEntry::Rejected { .. }))
        .count();
    let created = state.store.submit_batch(entries, backend);

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id: created.id,
            total: created.items.len(),
            queued: created.items.len() - rejected,
            rejected,
            status_url: format!("/verify/batch/{}", created.id),
        }),
    ))
}

/// GET /verify/batch/{job_id}: derived batch state, per-item results and summary.
pub async fn batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> VerifyResult<Json<BatchView>> {
    Ok(Json(state.store.batch(batch_id)?))
}
