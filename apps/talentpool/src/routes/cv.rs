use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use tracing::debug;

use crate::errors::AppError;
use crate::models::cv::CandidateCv;
use crate::state::AppState;

/// Largest accepted CV upload.
pub const MAX_CV_BYTES: usize = 10 * 1024 * 1024;

/// GET /api/v1/cv
pub async fn handle_get_cv(State(state): State<AppState>) -> Json<Option<CandidateCv>> {
    Json(state.cv.fetch_my_cv().await)
}

/// PUT /api/v1/cv
/// Multipart form with the document in a `file` field.
pub async fn handle_upload_cv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CandidateCv>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("Uploaded file has no name".to_string()))?;
        let content_type = field.content_type().map(str::to_string);
        let body = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?;
        debug!("Received CV upload {filename} ({} bytes)", body.len());

        let cv = state
            .cv
            .upload_cv(&filename, content_type.as_deref(), body)
            .await?;
        return Ok(Json(cv));
    }
    Err(AppError::Validation("Missing file field".to_string()))
}

/// DELETE /api/v1/cv
pub async fn handle_delete_cv(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.cv.delete_cv().await?;
    Ok(StatusCode::NO_CONTENT)
}
