use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobType;

pub const APPLICATIONS_TABLE: &str = "applications";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Reviewed,
    Accepted,
    Rejected,
}

/// Job columns embedded into application listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
}

/// Candidate columns a recruiter sees next to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateSummary>,
}

impl Application {
    /// Overlays a freshly written row, keeping embedded summaries the row lacks.
    pub fn merge_row(&mut self, row: Application) {
        let Application {
            id,
            job_id,
            candidate_id,
            status,
            created_at,
            updated_at,
            job,
            candidate,
        } = row;
        self.id = id;
        self.job_id = job_id;
        self.candidate_id = candidate_id;
        self.status = status;
        self.created_at = created_at.or(self.created_at);
        self.updated_at = updated_at.or(self.updated_at);
        if job.is_some() {
            self.job = job;
        }
        if candidate.is_some() {
            self.candidate = candidate;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewApplication {
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub status: ApplicationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_embedded_job() {
        let id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let mut listed = Application {
            id,
            job_id,
            candidate_id: Uuid::new_v4(),
            status: ApplicationStatus::Pending,
            created_at: None,
            updated_at: None,
            job: Some(JobSummary {
                id: job_id,
                title: "Backend Developer".into(),
                company: "DataStream".into(),
                location: None,
                job_type: None,
                salary: None,
            }),
            candidate: None,
        };
        let mut written = listed.clone();
        written.job = None;
        written.status = ApplicationStatus::Reviewed;
        written.updated_at = Some(Utc::now());

        listed.merge_row(written);
        assert_eq!(listed.status, ApplicationStatus::Reviewed);
        assert!(listed.updated_at.is_some());
        assert_eq!(listed.job.as_ref().map(|j| j.title.as_str()), Some("Backend Developer"));
    }
}
