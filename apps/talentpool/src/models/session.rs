use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::profile::Role;

/// Metadata attached to an identity at sign-up time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Backend-authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

/// Time-bounded bearer credential held by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// True when the access token expires within `margin_secs` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expires_at - now.timestamp() <= margin_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_at,
            user: User {
                id: Uuid::new_v4(),
                email: Some("x@y.io".into()),
                user_metadata: UserMetadata::default(),
            },
        }
    }

    #[test]
    fn test_expiry_margin() {
        let now = Utc::now();
        assert!(session(now.timestamp() + 30).expires_within(now, 60));
        assert!(!session(now.timestamp() + 3600).expires_within(now, 60));
    }

    #[test]
    fn test_user_metadata_tolerates_missing_fields() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "6f9c1c8e-8f2f-4a44-9a5e-0d6f0f1f2a3b",
            "email": "a@b.io",
            "user_metadata": {}
        }))
        .unwrap();
        assert_eq!(user.user_metadata, UserMetadata::default());
    }
}
