use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::backend::query::{fetch_maybe_single, fetch_rows, fetch_single, Query};
use crate::backend::{Backend, BackendError};
use crate::clock;
use crate::errors::AppError;
use crate::models::application::{
    Application, ApplicationStatus, NewApplication, APPLICATIONS_TABLE,
};
use crate::models::job::JOBS_TABLE;
use crate::models::profile::PROFILES_TABLE;
use crate::models::session::User;
use crate::resources::{Mirror, Resource};

const ALREADY_APPLIED: &str = "You have already applied to this job";

const CANDIDATE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "email",
    "headline",
    "phone",
    "location",
    "linkedin",
    "github",
    "skills",
    "experience",
    "education",
];

#[derive(Deserialize)]
struct IdRow {
    id: Uuid,
}

pub struct ApplicationsStore {
    auth: AuthContext,
    applications: Resource<Vec<Application>>,
}

impl ApplicationsStore {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            applications: Resource::new("applications"),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.auth.backend().as_ref()
    }

    /// Signed-in user, after re-keying the mirror to them.
    async fn current_user(&self) -> Option<User> {
        let user = self.auth.user();
        self.applications.scope_to(user.as_ref().map(|u| u.id)).await;
        user
    }

    pub async fn snapshot(&self) -> Mirror<Vec<Application>> {
        self.current_user().await;
        self.applications.snapshot().await
    }

    /// Applications received on the signed-in recruiter's postings, with
    /// job and candidate summaries embedded.
    pub async fn fetch_for_recruiter(&self) -> Mirror<Vec<Application>> {
        let Some(user) = self.current_user().await else {
            return self.applications.snapshot().await;
        };
        let ticket = self.applications.begin().await;
        let outcome = self.recruiter_rows(user.id).await.map_err(|e| {
            error!("Error fetching applications: {e}");
            AppError::from(e).message_or("Failed to fetch applications")
        });
        self.applications.finish(ticket, outcome).await;
        self.applications.snapshot().await
    }

    async fn recruiter_rows(&self, recruiter_id: Uuid) -> Result<Vec<Application>, BackendError> {
        let jobs = Query::table(JOBS_TABLE)
            .columns(&["id"])
            .eq("recruiter_id", recruiter_id);
        let job_ids: Vec<Uuid> = fetch_rows::<IdRow>(self.backend(), &jobs)
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::table(APPLICATIONS_TABLE)
            .embed("job", JOBS_TABLE, "job_id", &["id", "title", "company"])
            .embed("candidate", PROFILES_TABLE, "candidate_id", CANDIDATE_COLUMNS)
            .in_list("job_id", job_ids)
            .order("created_at", false);
        fetch_rows(self.backend(), &query).await
    }

    /// The signed-in candidate's own applications with job summaries.
    pub async fn fetch_for_candidate(&self) -> Mirror<Vec<Application>> {
        let Some(user) = self.current_user().await else {
            return self.applications.snapshot().await;
        };
        let ticket = self.applications.begin().await;
        let query = Query::table(APPLICATIONS_TABLE)
            .embed(
                "job",
                JOBS_TABLE,
                "job_id",
                &["id", "title", "company", "location", "type", "salary"],
            )
            .eq("candidate_id", user.id)
            .order("created_at", false);
        let outcome = fetch_rows(self.backend(), &query).await.map_err(|e| {
            error!("Error fetching candidate applications: {e}");
            AppError::from(e).message_or("Failed to fetch applications")
        });
        self.applications.finish(ticket, outcome).await;
        self.applications.snapshot().await
    }

    async fn failed(&self, error: AppError, fallback: &str) -> AppError {
        self.applications.fail(error.message_or(fallback)).await;
        error
    }

    pub async fn apply_to_job(&self, job_id: Uuid) -> Result<Application, AppError> {
        let user = self.current_user().await.ok_or_else(AppError::user_not_authenticated)?;
        let ticket = self.applications.ticket();

        match self.insert_application(job_id, user.id).await {
            Ok(application) => {
                info!("Candidate {} applied to job {job_id}", user.id);
                let row = application.clone();
                self.applications
                    .patch(ticket, user.id, |applications| applications.insert(0, row))
                    .await;
                Ok(application)
            }
            Err(e) => Err(self.failed(e, "Failed to apply to job").await),
        }
    }

    async fn insert_application(
        &self,
        job_id: Uuid,
        candidate_id: Uuid,
    ) -> Result<Application, AppError> {
        let existing = Query::table(APPLICATIONS_TABLE)
            .columns(&["id"])
            .eq("job_id", job_id)
            .eq("candidate_id", candidate_id);
        if let Ok(Some(_)) = fetch_maybe_single::<IdRow>(self.backend(), &existing).await {
            return Err(AppError::Conflict(ALREADY_APPLIED.to_string()));
        }

        let row = NewApplication {
            job_id,
            candidate_id,
            status: ApplicationStatus::Pending,
        };
        let insert = Query::table(APPLICATIONS_TABLE).insert(&[row])?.returning();
        fetch_single(self.backend(), &insert).await.map_err(|e| {
            if e.is_unique_violation() {
                AppError::Conflict(ALREADY_APPLIED.to_string())
            } else {
                AppError::from(e)
            }
        })
    }

    /// Moves an application to `status`, stamping `updated_at`. The returned
    /// row is merged over the cached one so embedded summaries survive.
    pub async fn update_application_status(
        &self,
        application_id: Uuid,
        status: ApplicationStatus,
    ) -> Result<Application, AppError> {
        let user = self.current_user().await.ok_or_else(AppError::user_not_authenticated)?;
        let ticket = self.applications.ticket();

        let query = Query::table(APPLICATIONS_TABLE)
            .update(json!({ "status": status, "updated_at": clock::now() }))
            .eq("id", application_id)
            .returning();
        let updated = match fetch_single::<Application>(self.backend(), &query).await {
            Ok(updated) => updated,
            Err(e) => {
                return Err(self
                    .failed(e.into(), "Failed to update application status")
                    .await)
            }
        };
        info!(
            "User {} moved application {application_id} to {status:?}",
            user.id
        );

        let row = updated.clone();
        self.applications
            .patch(ticket, user.id, |applications| {
                if let Some(cached) = applications.iter_mut().find(|a| a.id == application_id) {
                    cached.merge_row(row);
                }
            })
            .await;
        Ok(updated)
    }

    /// Whether the signed-in user has applied to `job_id`. Anonymous callers
    /// and failed reads both answer `false`.
    pub async fn check_if_applied(&self, job_id: Uuid) -> bool {
        let Some(user) = self.current_user().await else {
            return false;
        };
        let query = Query::table(APPLICATIONS_TABLE)
            .columns(&["id"])
            .eq("job_id", job_id)
            .eq("candidate_id", user.id);
        match fetch_maybe_single::<IdRow>(self.backend(), &query).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                error!("Error checking application status: {e}");
                false
            }
        }
    }
}
