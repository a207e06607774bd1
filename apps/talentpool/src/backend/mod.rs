//! Remote data backend seam.
//!
//! Everything durable (identities, sessions, rows, uploaded objects) lives in
//! the hosted backend. The rest of the crate talks to it only through the
//! [`Backend`] trait, carried as `Arc<dyn Backend>`.
//!
//! - [`RestBackend`]: the hosted service over HTTPS.
//! - [`MemoryServer`] / [`MemoryBackend`]: in-process stand-in with the same
//!   observable contract, used by tests and the offline demo mode.

pub mod memory;
pub mod query;
pub mod rest;
pub mod seed;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::session::{Session, UserMetadata};

pub use memory::{MemoryBackend, MemoryServer};
pub use query::Query;
pub use rest::RestBackend;

/// SQLSTATE for unique-constraint violations.
pub const UNIQUE_VIOLATION: &str = "23505";
/// PostgREST code for a `single()` read that matched zero or several rows.
pub const CARDINALITY_VIOLATION: &str = "PGRST116";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("JSON object requested, multiple (or no) rows returned")]
    Cardinality { rows: usize },
}

impl BackendError {
    pub fn api(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        BackendError::Api {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Api { code, .. } => code.as_deref(),
            BackendError::Cardinality { .. } => Some(CARDINALITY_VIOLATION),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::Cardinality { .. } => Some(406),
            BackendError::Http(e) => e.status().map(|s| s.as_u16()),
            BackendError::Decode(_) => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Pushed by the backend whenever its notion of the current session changes.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthChangeEvent,
    pub session: Option<Session>,
}

/// Capacity of every backend's auth-event channel.
pub const AUTH_EVENT_CAPACITY: usize = 16;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short tag for logs ("rest", "memory").
    fn backend_tag(&self) -> &'static str;

    // ── auth ────────────────────────────────────────────────────────────

    /// Current session, renewed first if it is about to expire.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Subscribes to auth state changes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Registers an identity. Returns a session when the backend signs the
    /// new identity in immediately (no email confirmation required).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<Option<Session>, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;

    // ── tables ──────────────────────────────────────────────────────────

    /// Runs one table operation. Returns the selected or written rows; empty
    /// for writes that did not ask for a representation.
    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    // ── storage ─────────────────────────────────────────────────────────

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        body: Bytes,
        upsert: bool,
    ) -> Result<(), BackendError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError>;
}

/// Object key for a public URL produced by [`Backend::public_url`].
pub fn object_key_from_public_url(url: &str, bucket: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let prefix = format!("/storage/v1/object/public/{bucket}/");
    parsed
        .path()
        .strip_prefix(&prefix)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}
