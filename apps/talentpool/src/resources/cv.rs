use std::path::Path;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::auth::AuthContext;
use crate::backend::query::{fetch_maybe_single, fetch_single, Query};
use crate::backend::{object_key_from_public_url, Backend};
use crate::clock;
use crate::errors::AppError;
use crate::models::cv::{CandidateCv, CvRecord, CANDIDATE_CVS_TABLE};
use crate::models::session::User;
use crate::resources::{Mirror, Resource};

const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "doc", "docx"];

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

fn default_content_type(ext: &str) -> &'static str {
    match ext {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        _ => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    }
}

/// The signed-in candidate's résumé: one object in the CV bucket plus one
/// `candidate_cvs` row pointing at it.
pub struct CvStore {
    auth: AuthContext,
    bucket: String,
    cv: Resource<Option<CandidateCv>>,
}

impl CvStore {
    pub fn new(auth: AuthContext, bucket: impl Into<String>) -> Self {
        Self {
            auth,
            bucket: bucket.into(),
            cv: Resource::new("cv"),
        }
    }

    fn backend(&self) -> &dyn Backend {
        self.auth.backend().as_ref()
    }

    /// Signed-in user, after re-keying the mirror to them.
    async fn current_user(&self) -> Option<User> {
        let user = self.auth.user();
        self.cv.scope_to(user.as_ref().map(|u| u.id)).await;
        user
    }

    async fn signed_in(&self) -> Result<User, AppError> {
        self.current_user()
            .await
            .ok_or_else(|| AppError::Unauthenticated("Not authenticated".to_string()))
    }

    /// The cached CV, provided it belongs to `user`.
    async fn cached_for(&self, user: &User) -> Option<CandidateCv> {
        self.cv
            .snapshot()
            .await
            .items
            .filter(|cv| cv.user_id == user.id)
    }

    /// Storage key behind `url`, only when it sits in `user`'s own folder.
    fn owned_key(&self, user: &User, url: &str) -> Option<String> {
        let folder = format!("{}/", user.id);
        object_key_from_public_url(url, &self.bucket).filter(|key| key.starts_with(&folder))
    }

    pub async fn snapshot(&self) -> Mirror<Option<CandidateCv>> {
        self.current_user().await;
        self.cv.snapshot().await
    }

    pub async fn fetch_my_cv(&self) -> Option<CandidateCv> {
        let user = self.current_user().await?;
        let ticket = self.cv.begin().await;
        let query = Query::table(CANDIDATE_CVS_TABLE)
            .eq("user_id", user.id)
            .order("uploaded_at", false);
        let outcome = fetch_maybe_single::<CandidateCv>(self.backend(), &query)
            .await
            .map_err(|e| {
                error!("Error fetching CV: {e}");
                AppError::from(e).message_or("Failed to load CV")
            });
        self.cv.finish(ticket, outcome).await;
        self.cv.snapshot().await.items
    }

    /// Stores `body` as the caller's CV, replacing any previous one.
    pub async fn upload_cv(
        &self,
        filename: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<CandidateCv, AppError> {
        let user = self.signed_in().await?;
        let ticket = self.cv.begin().await;
        let outcome = self.store(&user, filename, content_type, body).await;
        match &outcome {
            Ok(record) => {
                let record = record.clone();
                self.cv.patch(ticket, user.id, |cv| *cv = Some(record)).await;
            }
            Err(e) => self.cv.fail(e.message_or("Failed to upload CV")).await,
        }
        self.cv.settle().await;
        outcome
    }

    async fn store(
        &self,
        user: &User,
        filename: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<CandidateCv, AppError> {
        let ext = extension_of(filename).ok_or_else(|| {
            AppError::Validation("Please upload a PDF or Word document".to_string())
        })?;
        let path = format!("{}/cv.{ext}", user.id);
        let content_type = content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| default_content_type(&ext));

        let size = body.len();
        self.backend()
            .upload(&self.bucket, &path, content_type, body, true)
            .await?;
        let url = self.backend().public_url(&self.bucket, &path);
        let previous = self.cached_for(user).await;

        let record = CvRecord {
            user_id: user.id,
            filename,
            url: &url,
            uploaded_at: clock::now(),
        };
        let query = Query::table(CANDIDATE_CVS_TABLE)
            .upsert(&[record], "user_id")?
            .returning();
        let saved = fetch_single::<CandidateCv>(self.backend(), &query).await?;
        info!("Stored CV for {} ({size} bytes at {path})", user.id);

        // A previous CV with another extension lives under a different key.
        let stale = previous
            .and_then(|cv| self.owned_key(user, &cv.url))
            .filter(|key| key != &path);
        if let Some(key) = stale {
            if let Err(e) = self.backend().remove(&self.bucket, &[key]).await {
                warn!("Failed to remove replaced CV object: {e}");
            }
        }
        Ok(saved)
    }

    /// Reads `path` from disk and uploads it under its own file name.
    pub async fn upload_cv_from_path(&self, path: &Path) -> Result<CandidateCv, AppError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AppError::Validation("Please upload a PDF or Word document".to_string()))?
            .to_string();
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        self.upload_cv(&filename, None, Bytes::from(body)).await
    }

    /// Removes the caller's cached CV: the row first, then its object.
    /// Nothing cached: no-op.
    pub async fn delete_cv(&self) -> Result<(), AppError> {
        let user = self.signed_in().await?;
        let Some(current) = self.cached_for(&user).await else {
            return Ok(());
        };
        let ticket = self.cv.begin().await;

        let query = Query::table(CANDIDATE_CVS_TABLE)
            .delete()
            .eq("user_id", user.id);
        let outcome = self.backend().execute(&query).await;
        let result = match outcome {
            Ok(_) => {
                match self.owned_key(&user, &current.url) {
                    Some(key) => {
                        if let Err(e) = self.backend().remove(&self.bucket, &[key]).await {
                            warn!("Failed to remove CV object: {e}");
                        }
                    }
                    None => warn!("CV url {} is not in {}'s folder", current.url, user.id),
                }
                self.cv.patch(ticket, user.id, |cv| *cv = None).await;
                info!("Deleted CV for {}", user.id);
                Ok(())
            }
            Err(e) => {
                let e = AppError::from(e);
                self.cv.fail(e.message_or("Failed to delete CV")).await;
                Err(e)
            }
        };
        self.cv.settle().await;
        result
    }
}
