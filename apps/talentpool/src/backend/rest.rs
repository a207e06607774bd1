//! HTTPS client for the hosted backend: GoTrue-style auth under `/auth/v1`,
//! PostgREST tables under `/rest/v1`, object storage under `/storage/v1`.
//!
//! The client owns the current session the way a browser SDK would: it
//! attaches the access token to every request, refreshes it shortly before
//! expiry, and broadcasts an [`AuthEvent`] on every change.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::backend::query::{Operation, Query};
use crate::backend::{AuthChangeEvent, AuthEvent, Backend, BackendError, AUTH_EVENT_CAPACITY};
use crate::models::session::{Session, User, UserMetadata};

const MAX_READ_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;
/// Refresh the access token when it has less than this many seconds left.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            chrono::Utc::now().timestamp() + self.expires_in.unwrap_or(3600)
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: self.user,
        }
    }
}

pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: RwLock::new(None),
            events,
        })
    }

    fn emit(&self, kind: AuthChangeEvent, session: Option<Session>) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    /// Access token of the (refreshed if needed) session, else the anon key.
    async fn bearer(&self) -> String {
        match self.get_session().await {
            Ok(Some(session)) => session.access_token,
            _ => self.anon_key.clone(),
        }
    }

    fn authorize(&self, request: RequestBuilder, bearer: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn auth_post(&self, path: &str, body: Value) -> Result<Value, BackendError> {
        let url = format!("{}/auth/v1/{}", self.base_url, path);
        let response = self
            .authorize(self.client.post(&url), &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let body = self
            .auth_post(
                "token?grant_type=refresh_token",
                json!({ "refresh_token": refresh_token }),
            )
            .await?;
        Ok(serde_json::from_value::<TokenResponse>(body)?.into_session())
    }

    async fn install(&self, session: Session, kind: AuthChangeEvent) {
        *self.session.write().await = Some(session.clone());
        self.emit(kind, Some(session));
    }

    async fn clear(&self) {
        *self.session.write().await = None;
        self.emit(AuthChangeEvent::SignedOut, None);
    }

    fn table_request(&self, query: &Query) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, query.table);
        let prefer_return = if query.returning {
            "return=representation"
        } else {
            "return=minimal"
        };
        let request = match &query.operation {
            Operation::Select => self.client.get(&url),
            Operation::Insert(rows) => self
                .client
                .post(&url)
                .header("Prefer", prefer_return)
                .json(rows),
            Operation::Update(patch) => self
                .client
                .patch(&url)
                .header("Prefer", prefer_return)
                .json(patch),
            Operation::Upsert { rows, .. } => self
                .client
                .post(&url)
                .header("Prefer", format!("resolution=merge-duplicates,{prefer_return}"))
                .json(rows),
            Operation::Delete => self.client.delete(&url).header("Prefer", prefer_return),
        };
        request.query(&query.to_params())
    }
}

/// Maps a non-2xx response to [`BackendError::Api`], pulling the human
/// message out of whichever error shape the service used.
async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(parse_error_body(status, &body))
}

fn parse_error_body(status: StatusCode, body: &str) -> BackendError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let code = field("error_code").or_else(|| field("code"));
    let message = field("msg")
        .or_else(|| field("message"))
        .or_else(|| field("error_description"))
        .or_else(|| field("error"))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("Backend request failed")
                    .to_string()
            } else {
                body.to_string()
            }
        });
    BackendError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

fn rows_from_body(text: &str) -> Result<Vec<Value>, BackendError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(text)? {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        row => Ok(vec![row]),
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn backend_tag(&self) -> &'static str {
        "rest"
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let current = self.session.read().await.clone();
        let Some(session) = current else {
            return Ok(None);
        };
        if !session.expires_within(chrono::Utc::now(), REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }
        debug!("Access token close to expiry, refreshing");
        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.install(fresh.clone(), AuthChangeEvent::TokenRefreshed)
                    .await;
                Ok(Some(fresh))
            }
            Err(e) => {
                warn!("Session refresh failed, dropping session: {e}");
                self.clear().await;
                Err(e)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<Option<Session>, BackendError> {
        let body = self
            .auth_post(
                "signup",
                json!({ "email": email, "password": password, "data": metadata }),
            )
            .await?;
        // Auto-confirming projects answer with a session; the rest with a bare user.
        if body.get("access_token").is_none() {
            info!("Sign-up for {email} awaiting email confirmation");
            return Ok(None);
        }
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
        self.install(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(Some(session))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let body = self
            .auth_post(
                "token?grant_type=password",
                json!({ "email": email, "password": password }),
            )
            .await?;
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
        self.install(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = self.session.read().await.as_ref().map(|s| s.access_token.clone());
        let result = match token {
            Some(token) => {
                let url = format!("{}/auth/v1/logout", self.base_url);
                match self
                    .authorize(self.client.post(&url), &token)
                    .send()
                    .await
                {
                    Ok(response) => check_status(response).await.map(|_| ()),
                    Err(e) => Err(BackendError::from(e)),
                }
            }
            None => Ok(()),
        };
        // The local session goes away whatever the server said.
        self.clear().await;
        result
    }

    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let bearer = self.bearer().await;
        let attempts = if query.is_read() { MAX_READ_ATTEMPTS } else { 1 };
        let mut last_error: Option<BackendError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_BACKOFF_MS * (1 << (attempt - 1)));
                warn!(
                    "Read of {} failed (attempt {}), retrying after {}ms",
                    query.table,
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .authorize(self.table_request(query), &bearer)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(BackendError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(parse_error_body(status, &body));
                continue;
            }

            let response = check_status(response).await?;
            if !query.is_read() && !query.returning {
                return Ok(Vec::new());
            }
            let text = response.text().await?;
            let rows = rows_from_body(&text)?;
            debug!("{} returned {} row(s) from {}", self.backend_tag(), rows.len(), query.table);
            return Ok(rows);
        }

        Err(last_error.unwrap_or_else(|| {
            BackendError::api(503, None, format!("Failed to reach {}", query.table))
        }))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        body: Bytes,
        upsert: bool,
    ) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let bearer = self.bearer().await;
        let response = self
            .authorize(self.client.post(&url), &bearer)
            .header("Content-Type", content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let bearer = self.bearer().await;
        let response = self
            .authorize(self.client.delete(&url), &bearer)
            .json(&json!({ "prefixes": paths }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gotrue_error() {
        let err = parse_error_body(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#,
        );
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.code(), Some("invalid_credentials"));
    }

    #[test]
    fn test_parse_postgrest_error() {
        let err = parse_error_body(
            StatusCode::CONFLICT,
            r#"{"code":"23505","details":null,"hint":null,"message":"duplicate key value violates unique constraint"}"#,
        );
        assert!(err.is_unique_violation());
        assert_eq!(err.status(), Some(409));
    }

    #[test]
    fn test_parse_legacy_oauth_error() {
        let err = parse_error_body(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#,
        );
        assert_eq!(err.to_string(), "Email not confirmed");
    }

    #[test]
    fn test_parse_empty_body_uses_reason() {
        let err = parse_error_body(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(err.to_string(), "Service Unavailable");
    }

    #[test]
    fn test_rows_from_body_shapes() {
        assert!(rows_from_body("").unwrap().is_empty());
        assert_eq!(rows_from_body("[{\"id\":1},{\"id\":2}]").unwrap().len(), 2);
        assert_eq!(rows_from_body("{\"id\":1}").unwrap().len(), 1);
    }

    #[test]
    fn test_token_response_computes_expiry() {
        let body = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "user": { "id": "6f9c1c8e-8f2f-4a44-9a5e-0d6f0f1f2a3b", "email": "a@b.io" }
        });
        let session = serde_json::from_value::<TokenResponse>(body)
            .unwrap()
            .into_session();
        assert_eq!(session.token_type, "bearer");
        assert!(session.expires_at > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_public_url_shape() {
        let backend =
            RestBackend::new("https://abc.supabase.co/", "anon", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.public_url("cvs", "u1/cv.pdf"),
            "https://abc.supabase.co/storage/v1/object/public/cvs/u1/cv.pdf"
        );
    }
}
