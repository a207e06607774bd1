use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::errors::AppError;
use crate::models::application::{Application, ApplicationStatus};
use crate::resources::Mirror;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: ApplicationStatus,
}

/// GET /api/v1/applications/mine
pub async fn handle_my_applications(
    State(state): State<AppState>,
) -> Json<Mirror<Vec<Application>>> {
    Json(state.applications.fetch_for_candidate().await)
}

/// GET /api/v1/applications/received
pub async fn handle_received_applications(
    State(state): State<AppState>,
) -> Json<Mirror<Vec<Application>>> {
    Json(state.applications.fetch_for_recruiter().await)
}

/// PATCH /api/v1/applications/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Application>, AppError> {
    state
        .applications
        .update_application_status(id, req.status)
        .await
        .map(Json)
        .map_err(|e| match e {
            AppError::Backend(BackendError::Cardinality { .. }) => {
                AppError::NotFound("Application not found".to_string())
            }
            other => other,
        })
}
