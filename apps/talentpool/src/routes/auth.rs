use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::access::{capabilities_for, Capability};
use crate::auth::AuthState;
use crate::errors::AppError;
use crate::models::profile::{Profile, ProfileUpdate, Role};
use crate::models::session::User;
use crate::state::AppState;

/// What the view layer needs about the current session. Tokens stay in the
/// backend client.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub is_loading: bool,
    pub user: Option<User>,
    pub profile: Option<Profile>,
    pub capabilities: &'static [Capability],
}

impl From<&AuthState> for SessionView {
    fn from(state: &AuthState) -> Self {
        Self {
            is_loading: state.is_loading(),
            user: state.user().cloned(),
            profile: state.profile().cloned(),
            capabilities: capabilities_for(state),
        }
    }
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// GET /api/v1/session
pub async fn handle_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(SessionView::from(&state.auth.snapshot()))
}

/// POST /api/v1/auth/sign-up
/// Without email confirmation the new identity is signed in immediately;
/// otherwise the returned view is still anonymous.
pub async fn handle_sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<SessionView>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    state
        .auth
        .sign_up(req.email.trim(), &req.password, req.name.trim(), req.role)
        .await?;
    Ok(Json(SessionView::from(&state.auth.snapshot())))
}

/// POST /api/v1/auth/sign-in
pub async fn handle_sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SessionView>, AppError> {
    state.auth.sign_in(req.email.trim(), &req.password).await?;
    Ok(Json(SessionView::from(&state.auth.snapshot())))
}

/// POST /api/v1/auth/sign-out
pub async fn handle_sign_out(State(state): State<AppState>) -> Json<SessionView> {
    state.auth.sign_out().await;
    Json(SessionView::from(&state.auth.snapshot()))
}

/// PATCH /api/v1/profile
pub async fn handle_update_profile(
    State(state): State<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Option<Profile>>, AppError> {
    state.auth.update_profile(&update).await?;
    Ok(Json(state.auth.profile()))
}
