use std::sync::Arc;

use crate::auth::AuthContext;
use crate::config::Config;
use crate::resources::{ApplicationsStore, CvStore, JobsStore};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth: AuthContext,
    pub jobs: Arc<JobsStore>,
    pub applications: Arc<ApplicationsStore>,
    pub cv: Arc<CvStore>,
}

impl AppState {
    pub fn new(config: Config, auth: AuthContext) -> Self {
        let cv = CvStore::new(auth.clone(), config.cv_bucket.clone());
        Self {
            jobs: Arc::new(JobsStore::new(auth.clone())),
            applications: Arc::new(ApplicationsStore::new(auth.clone())),
            cv: Arc::new(cv),
            auth,
            config,
        }
    }
}
