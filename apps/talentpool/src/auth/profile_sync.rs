//! Profile provisioning and reads used by the session synchronizer.
//!
//! Both functions swallow backend failures: they log and degrade, leaving the
//! caller to carry on with whatever it already has.

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backend::query::{fetch_maybe_single, Query};
use crate::backend::Backend;
use crate::models::profile::{NewProfile, Profile, Role, PROFILES_TABLE};
use crate::models::session::User;

/// Reads the profile row for `user_id`, `None` when absent or unreadable.
pub async fn fetch_profile(backend: &dyn Backend, user_id: Uuid) -> Option<Profile> {
    let query = Query::table(PROFILES_TABLE).eq("id", user_id);
    match fetch_maybe_single::<Profile>(backend, &query).await {
        Ok(profile) => profile,
        Err(e) => {
            error!("fetch_profile failed for {user_id}: {e}");
            None
        }
    }
}

/// Creates the profile row for `user` only if it is missing.
///
/// Check-then-upsert keyed on the identity id, so repeated or overlapping
/// calls for the same identity converge on one row. Name and role come from
/// the metadata attached at sign-up; role defaults to candidate.
pub async fn ensure_profile_exists(backend: &dyn Backend, user: &User) {
    let check = Query::table(PROFILES_TABLE).columns(&["id"]).eq("id", user.id);
    match fetch_maybe_single::<serde_json::Value>(backend, &check).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => warn!("ensure_profile_exists check failed for {} (will still upsert): {e}", user.id),
    }

    let row = NewProfile {
        id: user.id,
        email: user.email.as_deref().unwrap_or_default(),
        name: user.user_metadata.name.as_deref().unwrap_or_default(),
        role: user.user_metadata.role.unwrap_or(Role::Candidate),
    };
    let upsert = match Query::table(PROFILES_TABLE).upsert(&[row], "id") {
        Ok(query) => query,
        Err(e) => {
            error!("ensure_profile_exists could not encode row for {}: {e}", user.id);
            return;
        }
    };
    match backend.execute(&upsert).await {
        Ok(_) => debug!("Provisioned profile for {}", user.id),
        Err(e) => error!("ensure_profile_exists upsert failed for {}: {e}", user.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryServer;
    use crate::models::session::UserMetadata;
    use std::sync::Arc;

    fn recruiter(id: Uuid) -> User {
        User {
            id,
            email: Some("r@talentpool.io".into()),
            user_metadata: UserMetadata {
                name: Some("Rita".into()),
                role: Some(Role::Recruiter),
            },
        }
    }

    #[tokio::test]
    async fn test_ensure_creates_from_metadata() {
        let server = MemoryServer::new();
        let client = server.connect();
        let user = recruiter(Uuid::new_v4());

        ensure_profile_exists(&client, &user).await;
        let profile = fetch_profile(&client, user.id).await.unwrap();
        assert_eq!(profile.role, Role::Recruiter);
        assert_eq!(profile.name, "Rita");
        assert_eq!(profile.email, "r@talentpool.io");
    }

    #[tokio::test]
    async fn test_ensure_defaults_to_candidate() {
        let server = MemoryServer::new();
        let client = server.connect();
        let user = User {
            id: Uuid::new_v4(),
            email: Some("c@talentpool.io".into()),
            user_metadata: UserMetadata::default(),
        };
        ensure_profile_exists(&client, &user).await;
        let profile = fetch_profile(&client, user.id).await.unwrap();
        assert_eq!(profile.role, Role::Candidate);
        assert_eq!(profile.name, "");
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_under_concurrency() {
        let server = MemoryServer::new();
        let client = Arc::new(server.connect());
        let user = recruiter(Uuid::new_v4());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            let user = user.clone();
            tasks.spawn(async move { ensure_profile_exists(client.as_ref(), &user).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
        ensure_profile_exists(client.as_ref(), &user).await;

        assert_eq!(server.table_rows(PROFILES_TABLE).await.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_leaves_existing_profile_untouched() {
        let server = MemoryServer::new();
        let client = server.connect();
        let user = recruiter(Uuid::new_v4());
        ensure_profile_exists(&client, &user).await;

        let mut renamed = user.clone();
        renamed.user_metadata.name = Some("Someone Else".into());
        ensure_profile_exists(&client, &renamed).await;

        let profile = fetch_profile(&client, user.id).await.unwrap();
        assert_eq!(profile.name, "Rita");
    }

    #[tokio::test]
    async fn test_failed_upsert_degrades_to_no_profile() {
        let server = MemoryServer::new();
        server.deny_writes(PROFILES_TABLE).await;
        let client = server.connect();
        let user = recruiter(Uuid::new_v4());

        ensure_profile_exists(&client, &user).await;
        assert!(fetch_profile(&client, user.id).await.is_none());
    }
}
