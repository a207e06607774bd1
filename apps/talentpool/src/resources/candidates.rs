//! Read-only candidate lookup for recruiters.

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::backend::query::{fetch_maybe_single, fetch_single, Query};
use crate::backend::{Backend, BackendError};
use crate::errors::AppError;
use crate::models::cv::{CandidateCv, CANDIDATE_CVS_TABLE};
use crate::models::profile::{Profile, Role, PROFILES_TABLE};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateDetail {
    pub profile: Profile,
    pub cv: Option<CandidateCv>,
}

/// A candidate's profile plus their CV when it can be read. Recruiter
/// profiles are never returned through this path.
pub async fn get_candidate_profile(
    backend: &dyn Backend,
    candidate_id: Uuid,
) -> Result<CandidateDetail, AppError> {
    let query = Query::table(PROFILES_TABLE)
        .eq("id", candidate_id)
        .eq("role", Role::Candidate.as_str());
    let profile = fetch_single::<Profile>(backend, &query)
        .await
        .map_err(|e| match e {
            BackendError::Cardinality { .. } => AppError::NotFound("Candidate not found".to_string()),
            other => other.into(),
        })?;

    let query = Query::table(CANDIDATE_CVS_TABLE)
        .eq("user_id", candidate_id)
        .order("uploaded_at", false);
    let cv = match fetch_maybe_single::<CandidateCv>(backend, &query).await {
        Ok(cv) => cv,
        Err(e) => {
            warn!("Could not read CV for candidate {candidate_id}: {e}");
            None
        }
    };

    Ok(CandidateDetail { profile, cv })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::backend::MemoryServer;
    use crate::models::session::UserMetadata;
    use crate::resources::CvStore;
    use bytes::Bytes;
    use std::sync::Arc;

    async fn sign_in(server: &Arc<MemoryServer>, email: &str, role: Role) -> AuthContext {
        server
            .create_user(
                email,
                "secret1",
                UserMetadata {
                    name: Some("Someone".into()),
                    role: Some(role),
                },
            )
            .await;
        let auth = AuthContext::init(Arc::new(server.connect())).await;
        auth.sign_in(email, "secret1").await.unwrap();
        auth
    }

    #[tokio::test]
    async fn test_candidate_with_cv() {
        let server = MemoryServer::new();
        let jane = sign_in(&server, "jane@mail.io", Role::Candidate).await;
        let jane_id = jane.user().unwrap().id;
        CvStore::new(jane, "cvs")
            .upload_cv("cv.pdf", None, Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        let recruiter = sign_in(&server, "john@innovate.io", Role::Recruiter).await;
        let detail = get_candidate_profile(recruiter.backend().as_ref(), jane_id)
            .await
            .unwrap();
        assert_eq!(detail.profile.email, "jane@mail.io");
        assert_eq!(detail.cv.unwrap().filename, "cv.pdf");
    }

    #[tokio::test]
    async fn test_recruiters_and_unknown_ids_are_not_found() {
        let server = MemoryServer::new();
        let recruiter = sign_in(&server, "john@innovate.io", Role::Recruiter).await;
        let backend = recruiter.backend().clone();
        let recruiter_id = recruiter.user().unwrap().id;

        for id in [recruiter_id, Uuid::new_v4()] {
            let err = get_candidate_profile(backend.as_ref(), id).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
            assert_eq!(err.to_string(), "Candidate not found");
        }
    }

    #[tokio::test]
    async fn test_candidate_without_cv() {
        let server = MemoryServer::new();
        let jane = sign_in(&server, "jane@mail.io", Role::Candidate).await;
        let detail = get_candidate_profile(jane.backend().as_ref(), jane.user().unwrap().id)
            .await
            .unwrap();
        assert!(detail.cv.is_none());
    }
}
