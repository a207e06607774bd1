//! Role-to-capability mapping checked once per gated request.

use serde::Serialize;

use crate::auth::AuthState;
use crate::errors::AppError;
use crate::models::profile::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    BrowseJobs,
    EditOwnProfile,
    ApplyToJobs,
    TrackOwnApplications,
    ManageOwnCv,
    PostJobs,
    ManageOwnJobs,
    ReviewApplications,
    ViewCandidates,
}

const ANONYMOUS: &[Capability] = &[Capability::BrowseJobs];

/// Signed in, but the profile row is missing or unreadable.
const UNPROVISIONED: &[Capability] = &[Capability::BrowseJobs, Capability::EditOwnProfile];

const CANDIDATE: &[Capability] = &[
    Capability::BrowseJobs,
    Capability::EditOwnProfile,
    Capability::ApplyToJobs,
    Capability::TrackOwnApplications,
    Capability::ManageOwnCv,
];

const RECRUITER: &[Capability] = &[
    Capability::BrowseJobs,
    Capability::EditOwnProfile,
    Capability::PostJobs,
    Capability::ManageOwnJobs,
    Capability::ReviewApplications,
    Capability::ViewCandidates,
];

pub fn capabilities_for(state: &AuthState) -> &'static [Capability] {
    if !state.is_authenticated() {
        return ANONYMOUS;
    }
    match state.role() {
        Some(Role::Candidate) => CANDIDATE,
        Some(Role::Recruiter) => RECRUITER,
        None => UNPROVISIONED,
    }
}

/// `Unauthenticated` for anonymous callers, `Forbidden` for signed-in
/// callers whose role lacks `capability`.
pub fn authorize(state: &AuthState, capability: Capability) -> Result<(), AppError> {
    if capabilities_for(state).contains(&capability) {
        return Ok(());
    }
    if state.is_authenticated() {
        Err(AppError::Forbidden(format!(
            "Your account is not allowed to {}",
            describe(capability)
        )))
    } else {
        Err(AppError::user_not_authenticated())
    }
}

fn describe(capability: Capability) -> &'static str {
    match capability {
        Capability::BrowseJobs => "browse jobs",
        Capability::EditOwnProfile => "edit a profile",
        Capability::ApplyToJobs => "apply to jobs",
        Capability::TrackOwnApplications => "track applications",
        Capability::ManageOwnCv => "manage a CV",
        Capability::PostJobs => "post jobs",
        Capability::ManageOwnJobs => "manage job postings",
        Capability::ReviewApplications => "review applications",
        Capability::ViewCandidates => "view candidates",
    }
}
