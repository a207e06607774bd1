use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CANDIDATE_CVS_TABLE: &str = "candidate_cvs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCv {
    pub id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    /// Public object-storage URL.
    pub url: String,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CvRecord<'a> {
    pub user_id: Uuid,
    pub filename: &'a str,
    pub url: &'a str,
    pub uploaded_at: DateTime<Utc>,
}
