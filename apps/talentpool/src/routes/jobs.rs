use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::errors::AppError;
use crate::models::application::Application;
use crate::models::job::{Job, JobUpdate, NewJob};
use crate::resources::Mirror;
use crate::state::AppState;

fn job_not_found(e: AppError) -> AppError {
    match e {
        AppError::Backend(BackendError::Cardinality { .. }) => {
            AppError::NotFound("Job not found".to_string())
        }
        other => other,
    }
}

fn validate(job: &NewJob) -> Result<(), AppError> {
    let required = [
        ("title", &job.title),
        ("company", &job.company),
        ("location", &job.location),
        ("description", &job.description),
    ];
    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(AppError::Validation(format!("Job {field} is required"))),
        None => Ok(()),
    }
}

/// GET /api/v1/jobs
pub async fn handle_list_jobs(State(state): State<AppState>) -> Json<Mirror<Vec<Job>>> {
    Json(state.jobs.fetch_jobs().await)
}

/// GET /api/v1/jobs/mine
pub async fn handle_my_jobs(State(state): State<AppState>) -> Json<Mirror<Vec<Job>>> {
    Json(state.jobs.fetch_recruiter_jobs().await)
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    state
        .jobs
        .get_job_by_id(id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Job not found".to_string()))
}

/// POST /api/v1/jobs
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(job): Json<NewJob>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    validate(&job)?;
    let created = state.jobs.create_job(&job).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PATCH /api/v1/jobs/:id
pub async fn handle_update_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<JobUpdate>,
) -> Result<Json<Job>, AppError> {
    let updated = state.jobs.update_job(id, &update).await.map_err(job_not_found)?;
    Ok(Json(updated))
}

/// DELETE /api/v1/jobs/:id
/// Zero deleted rows means the job is missing or owned by someone else.
pub async fn handle_delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    match state.jobs.delete_job(id).await? {
        0 => Err(AppError::NotFound("Job not found".to_string())),
        _ => Ok(StatusCode::NO_CONTENT),
    }
}

/// POST /api/v1/jobs/:id/apply
pub async fn handle_apply(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Application>), AppError> {
    if state.jobs.get_job_by_id(id).await.is_none() {
        return Err(AppError::NotFound("Job not found".to_string()));
    }
    let application = state.applications.apply_to_job(id).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /api/v1/jobs/:id/applied
pub async fn handle_applied(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Value> {
    Json(json!({ "applied": state.applications.check_if_applied(id).await }))
}
