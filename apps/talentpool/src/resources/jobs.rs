use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::backend::query::{fetch_maybe_single, fetch_rows, fetch_single, Query};
use crate::backend::{Backend, BackendError};
use crate::clock;
use crate::errors::AppError;
use crate::models::job::{Job, JobUpdate, NewJob, JOBS_TABLE};
use crate::models::session::User;
use crate::resources::{Mirror, Resource};

/// Job listings plus the recruiter's posting actions.
pub struct JobsStore {
    auth: AuthContext,
    jobs: Resource<Vec<Job>>,
}

impl JobsStore {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            jobs: Resource::new("jobs"),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.auth.backend().as_ref()
    }

    /// Signed-in user, after re-keying the mirror to them.
    async fn current_user(&self) -> Option<User> {
        let user = self.auth.user();
        self.jobs.scope_to(user.as_ref().map(|u| u.id)).await;
        user
    }

    pub async fn snapshot(&self) -> Mirror<Vec<Job>> {
        self.current_user().await;
        self.jobs.snapshot().await
    }

    async fn load(&self, query: Query) -> Mirror<Vec<Job>> {
        let ticket = self.jobs.begin().await;
        let outcome = fetch_rows::<Job>(self.backend(), &query)
            .await
            .map_err(|e| {
                error!("Error fetching jobs: {e}");
                AppError::from(e).message_or("Failed to fetch jobs")
            });
        self.jobs.finish(ticket, outcome).await;
        self.jobs.snapshot().await
    }

    /// Every posting, newest first.
    pub async fn fetch_jobs(&self) -> Mirror<Vec<Job>> {
        self.current_user().await;
        self.load(Query::table(JOBS_TABLE).order("created_at", false))
            .await
    }

    pub async fn refresh_jobs(&self) -> Mirror<Vec<Job>> {
        self.fetch_jobs().await
    }

    /// Postings owned by the signed-in recruiter. Anonymous: no-op.
    pub async fn fetch_recruiter_jobs(&self) -> Mirror<Vec<Job>> {
        let Some(user) = self.current_user().await else {
            return self.jobs.snapshot().await;
        };
        self.load(
            Query::table(JOBS_TABLE)
                .eq("recruiter_id", user.id)
                .order("created_at", false),
        )
        .await
    }

    async fn failed(&self, error: impl Into<AppError>, fallback: &str) -> AppError {
        let error = error.into();
        self.jobs.fail(error.message_or(fallback)).await;
        error
    }

    /// Inserts a posting owned by the caller, then reloads the full list.
    pub async fn create_job(&self, job: &NewJob) -> Result<Job, AppError> {
        let user = self.current_user().await.ok_or_else(AppError::user_not_authenticated)?;

        let mut row = serde_json::to_value(job).map_err(BackendError::from)?;
        row["recruiter_id"] = json!(user.id);
        let query = Query::table(JOBS_TABLE).insert(&[row])?.returning();
        let created = match fetch_single::<Job>(self.backend(), &query).await {
            Ok(created) => created,
            Err(e) => return Err(self.failed(e, "Failed to create job").await),
        };
        info!("Recruiter {} posted job {}", user.id, created.id);

        self.fetch_jobs().await;
        Ok(created)
    }

    /// Updates a posting the caller owns. Rows owned by anyone else are
    /// filtered out, so the single-row read fails for them.
    pub async fn update_job(&self, job_id: Uuid, update: &JobUpdate) -> Result<Job, AppError> {
        let user = self.current_user().await.ok_or_else(AppError::user_not_authenticated)?;
        let ticket = self.jobs.ticket();

        let mut payload = serde_json::to_value(update).map_err(BackendError::from)?;
        payload["updated_at"] = json!(clock::now());
        let query = Query::table(JOBS_TABLE)
            .update(payload)
            .eq("id", job_id)
            .eq("recruiter_id", user.id)
            .returning();
        let updated = match fetch_single::<Job>(self.backend(), &query).await {
            Ok(updated) => updated,
            Err(e) => return Err(self.failed(e, "Failed to update job").await),
        };

        let replacement = updated.clone();
        self.jobs
            .patch(ticket, user.id, |jobs| {
                for job in jobs.iter_mut().filter(|j| j.id == job_id) {
                    *job = replacement.clone();
                }
            })
            .await;
        Ok(updated)
    }

    /// Deletes a posting the caller owns and returns how many rows went away
    /// (zero when the caller is not the owner).
    pub async fn delete_job(&self, job_id: Uuid) -> Result<usize, AppError> {
        let user = self.current_user().await.ok_or_else(AppError::user_not_authenticated)?;
        let ticket = self.jobs.ticket();

        let query = Query::table(JOBS_TABLE)
            .delete()
            .eq("id", job_id)
            .eq("recruiter_id", user.id)
            .returning();
        let deleted = match self.backend().execute(&query).await {
            Ok(rows) => rows.len(),
            Err(e) => return Err(self.failed(e, "Failed to delete job").await),
        };

        if deleted > 0 {
            self.jobs
                .patch(ticket, user.id, |jobs| jobs.retain(|j| j.id != job_id))
                .await;
            info!("Recruiter {} deleted job {job_id}", user.id);
        }
        Ok(deleted)
    }

    /// Single posting lookup; failures are logged and read as "not found".
    pub async fn get_job_by_id(&self, job_id: Uuid) -> Option<Job> {
        let query = Query::table(JOBS_TABLE).eq("id", job_id);
        match fetch_maybe_single::<Job>(self.backend(), &query).await {
            Ok(job) => job,
            Err(e) => {
                error!("Error fetching job {job_id}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryServer;
    use crate::models::job::JobType;
    use crate::models::profile::Role;
    use crate::models::session::UserMetadata;
    use std::sync::Arc;

    fn posting(title: &str) -> NewJob {
        NewJob {
            title: title.to_string(),
            company: "Innovate Inc.".into(),
            location: "Remote".into(),
            job_type: JobType::FullTime,
            salary: "$150,000 - $180,000".into(),
            description: "Build things.".into(),
            responsibilities: vec!["Ship features".into()],
            qualifications: vec!["Rust".into()],
        }
    }

    async fn recruiter_store(server: &Arc<MemoryServer>, email: &str) -> JobsStore {
        server
            .create_user(
                email,
                "secret1",
                UserMetadata {
                    name: Some("Recruiter".into()),
                    role: Some(Role::Recruiter),
                },
            )
            .await;
        let auth = AuthContext::init(Arc::new(server.connect())).await;
        auth.sign_in(email, "secret1").await.unwrap();
        JobsStore::new(auth)
    }

    #[tokio::test]
    async fn test_create_requires_authentication() {
        let server = MemoryServer::new();
        let auth = AuthContext::init(Arc::new(server.connect())).await;
        let store = JobsStore::new(auth);
        let err = store.create_job(&posting("Engineer")).await.unwrap_err();
        assert_eq!(err.to_string(), "User not authenticated");
    }

    #[tokio::test]
    async fn test_create_stamps_owner_and_refreshes_list() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "r1@talentpool.io").await;
        let owner = store.auth.user().unwrap().id;

        let created = store.create_job(&posting("Engineer")).await.unwrap();
        assert_eq!(created.recruiter_id, owner);
        assert_eq!(created.job_type, JobType::FullTime);
        assert_eq!(store.snapshot().await.items.len(), 1);

        let mirror = store.refresh_jobs().await;
        assert_eq!(mirror.items.len(), 1);
        assert!(mirror.error.is_none());
    }

    #[tokio::test]
    async fn test_lists_are_newest_first_and_filtered_by_owner() {
        let server = MemoryServer::new();
        let first = recruiter_store(&server, "r1@talentpool.io").await;
        let second = recruiter_store(&server, "r2@talentpool.io").await;
        first.create_job(&posting("Older")).await.unwrap();
        first.create_job(&posting("Newer")).await.unwrap();
        second.create_job(&posting("Elsewhere")).await.unwrap();

        let all = first.fetch_jobs().await;
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.items[0].title, "Elsewhere");

        let mine = first.fetch_recruiter_jobs().await;
        let titles: Vec<_> = mine.items.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer", "Older"]);
    }

    #[tokio::test]
    async fn test_update_patches_mirror_and_advances_updated_at() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "r1@talentpool.io").await;
        let created = store.create_job(&posting("Engineer")).await.unwrap();

        let update = JobUpdate {
            salary: Some("Competitive".into()),
            ..Default::default()
        };
        let updated = store.update_job(created.id, &update).await.unwrap();
        assert_eq!(updated.salary, "Competitive");
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(store.snapshot().await.items[0].salary, "Competitive");
    }

    #[tokio::test]
    async fn test_non_owner_cannot_update_or_delete() {
        let server = MemoryServer::new();
        let owner = recruiter_store(&server, "owner@talentpool.io").await;
        let intruder = recruiter_store(&server, "intruder@talentpool.io").await;
        let job = owner.create_job(&posting("Engineer")).await.unwrap();
        intruder.fetch_jobs().await;

        let update = JobUpdate {
            title: Some("Hijacked".into()),
            ..Default::default()
        };
        assert!(intruder.update_job(job.id, &update).await.is_err());
        assert_eq!(intruder.delete_job(job.id).await.unwrap(), 0);

        assert_eq!(server.table_rows(JOBS_TABLE).await.len(), 1);
        assert_eq!(intruder.snapshot().await.items.len(), 1);
        let mine = owner.fetch_recruiter_jobs().await;
        assert_eq!(mine.items.len(), 1);
        assert_eq!(mine.items[0].title, "Engineer");
    }

    #[tokio::test]
    async fn test_owner_delete_removes_row_and_mirror_entry() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "r1@talentpool.io").await;
        let job = store.create_job(&posting("Engineer")).await.unwrap();

        assert_eq!(store.delete_job(job.id).await.unwrap(), 1);
        assert!(store.snapshot().await.items.is_empty());
        assert!(store.get_job_by_id(job.id).await.is_none());
    }

    #[tokio::test]
    async fn test_get_job_by_id() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "r1@talentpool.io").await;
        let job = store.create_job(&posting("Engineer")).await.unwrap();
        assert_eq!(store.get_job_by_id(job.id).await.unwrap().title, "Engineer");
        assert!(store.get_job_by_id(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_is_recorded() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "r1@talentpool.io").await;
        server.deny_writes(JOBS_TABLE).await;

        let err = store.create_job(&posting("Engineer")).await.unwrap_err();
        assert!(err.to_string().contains("row-level security"));
        assert_eq!(store.snapshot().await.error, Some(err.to_string()));
    }

    #[tokio::test]
    async fn test_recruiter_list_resets_on_identity_change() {
        let server = MemoryServer::new();
        let store = recruiter_store(&server, "ann@talentpool.io").await;
        let job = store.create_job(&posting("Engineer")).await.unwrap();
        assert_eq!(store.fetch_recruiter_jobs().await.items.len(), 1);
        server
            .create_user(
                "bob@talentpool.io",
                "secret1",
                UserMetadata {
                    name: Some("Bob".into()),
                    role: Some(Role::Recruiter),
                },
            )
            .await;

        store.auth.sign_out().await;
        store.auth.sign_in("bob@talentpool.io", "secret1").await.unwrap();
        assert!(store.snapshot().await.items.is_empty());
        assert!(store.fetch_recruiter_jobs().await.items.is_empty());
        assert_eq!(store.delete_job(job.id).await.unwrap(), 0);
        assert_eq!(server.table_rows(JOBS_TABLE).await.len(), 1);
    }
}
