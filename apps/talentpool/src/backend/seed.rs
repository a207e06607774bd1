//! Demo data for the offline mode: one recruiter, one candidate, a handful
//! of postings and the candidate's existing applications.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::backend::query::Query;
use crate::backend::{Backend, MemoryServer};
use crate::models::application::APPLICATIONS_TABLE;
use crate::models::job::{NewJob, JOBS_TABLE};
use crate::models::profile::{Role, PROFILES_TABLE};
use crate::models::session::UserMetadata;

const DEMO_JSON: &str = include_str!("../../seed/demo.json");

#[derive(Debug, Deserialize)]
struct DemoRecruiter {
    email: String,
    name: String,
    company: String,
    position: String,
}

#[derive(Debug, Deserialize)]
struct DemoCandidate {
    email: String,
    name: String,
    headline: String,
    skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DemoJob {
    #[serde(flatten)]
    job: NewJob,
    candidate_applied: bool,
}

#[derive(Debug, Deserialize)]
struct DemoData {
    password: String,
    recruiter: DemoRecruiter,
    candidate: DemoCandidate,
    jobs: Vec<DemoJob>,
}

/// Builds a memory server pre-populated with the demo data set.
pub async fn demo_server() -> Result<Arc<MemoryServer>> {
    let data: DemoData = serde_json::from_str(DEMO_JSON).context("demo seed is not valid JSON")?;
    let server = MemoryServer::new();
    let admin = server.connect();

    let recruiter = server
        .create_user(
            &data.recruiter.email,
            &data.password,
            UserMetadata {
                name: Some(data.recruiter.name.clone()),
                role: Some(Role::Recruiter),
            },
        )
        .await;
    let candidate = server
        .create_user(
            &data.candidate.email,
            &data.password,
            UserMetadata {
                name: Some(data.candidate.name.clone()),
                role: Some(Role::Candidate),
            },
        )
        .await;

    let profiles = [
        json!({
            "id": recruiter.id,
            "email": data.recruiter.email,
            "name": data.recruiter.name,
            "role": Role::Recruiter,
            "company": data.recruiter.company,
            "position": data.recruiter.position,
        }),
        json!({
            "id": candidate.id,
            "email": data.candidate.email,
            "name": data.candidate.name,
            "role": Role::Candidate,
            "headline": data.candidate.headline,
            "skills": data.candidate.skills,
        }),
    ];
    admin
        .execute(&Query::table(PROFILES_TABLE).insert(&profiles)?)
        .await?;

    let mut applied = 0;
    for demo in &data.jobs {
        let mut row = serde_json::to_value(&demo.job)?;
        row["recruiter_id"] = json!(recruiter.id);
        let inserted = admin
            .execute(&Query::table(JOBS_TABLE).insert(&[row])?.returning())
            .await?;
        let job_id = inserted
            .first()
            .and_then(|r| r.get("id").cloned())
            .context("seeded job has no id")?;
        if demo.candidate_applied {
            let application = json!({ "job_id": job_id, "candidate_id": candidate.id });
            admin
                .execute(&Query::table(APPLICATIONS_TABLE).insert(&[application])?)
                .await?;
            applied += 1;
        }
    }

    info!(
        "Seeded demo backend: {} jobs, {} applications (recruiter {}, candidate {})",
        data.jobs.len(),
        applied,
        data.recruiter.email,
        data.candidate.email
    );
    Ok(server)
}
