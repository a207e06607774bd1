use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::errors::AppError;
use crate::resources::{get_candidate_profile, CandidateDetail};
use crate::state::AppState;

/// GET /api/v1/candidates/:id
pub async fn handle_get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CandidateDetail>, AppError> {
    let detail = get_candidate_profile(state.auth.backend().as_ref(), id).await?;
    Ok(Json(detail))
}
