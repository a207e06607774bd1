//! Session/auth synchronizer.
//!
//! [`AuthContext`] is the one process-wide mirror of {session, user, profile}.
//! It is created with [`AuthContext::init`], which reads the current session
//! and subscribes to the backend's auth events, and detached with
//! [`AuthContext::shutdown`]. Consumers receive it through `AppState`.
//!
//! Every resync runs ensure-profile-exists then fetch-profile. Resyncs may
//! overlap; each takes a ticket up front and only the newest result lands.

pub mod profile_sync;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::query::Query;
use crate::backend::{AuthEvent, Backend, BackendError};
use crate::clock;
use crate::errors::AppError;
use crate::fence::{RequestFence, Ticket, Watermark};
use crate::models::profile::{Profile, ProfileUpdate, Role, PROFILES_TABLE};
use crate::models::session::{Session, User, UserMetadata};

pub use profile_sync::{ensure_profile_exists, fetch_profile};
pub use state::AuthState;

struct Inner {
    backend: Arc<dyn Backend>,
    state: watch::Sender<AuthState>,
    fence: RequestFence,
    watermark: Mutex<Watermark>,
    alive: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    async fn current_session(&self) -> Option<Session> {
        match self.backend.get_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("get_session failed: {e}");
                None
            }
        }
    }

    async fn resync(&self, session: Option<Session>) {
        let ticket = self.fence.issue();
        let next = match session {
            Some(session) => {
                ensure_profile_exists(self.backend.as_ref(), &session.user).await;
                let profile = fetch_profile(self.backend.as_ref(), session.user.id).await;
                AuthState::Authenticated { session, profile }
            }
            None => AuthState::Anonymous,
        };
        self.apply(ticket, next).await;
    }

    /// Publishes `next` unless the context is shut down or a newer update
    /// already landed.
    async fn apply(&self, ticket: Ticket, next: AuthState) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            debug!("Ignoring auth update after shutdown");
            return false;
        }
        let mut watermark = self.watermark.lock().await;
        if !watermark.admit(ticket) {
            debug!("Dropping stale auth resync");
            return false;
        }
        self.state.send_replace(next);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

async fn listen(inner: Weak<Inner>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        let received = events.recv().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.alive.load(Ordering::SeqCst) {
            break;
        }
        let session = match received {
            Ok(event) => {
                debug!("Auth event {:?}", event.kind);
                event.session
            }
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {missed} auth event(s), re-reading session");
                inner.current_session().await
            }
            Err(RecvError::Closed) => break,
        };
        inner.resync(session).await;
    }
    debug!("Auth listener stopped");
}

#[derive(Clone)]
pub struct AuthContext {
    inner: Arc<Inner>,
}

impl AuthContext {
    /// Subscribes to backend auth events, then settles the initial state from
    /// the backend's current session.
    pub async fn init(backend: Arc<dyn Backend>) -> Self {
        let (state, _) = watch::channel(AuthState::Uninitialized);
        let events = backend.subscribe();
        let inner = Arc::new(Inner {
            backend,
            state,
            fence: RequestFence::default(),
            watermark: Mutex::new(Watermark::default()),
            alive: AtomicBool::new(true),
            listener: Mutex::new(None),
        });

        inner.state.send_replace(AuthState::Loading);
        let handle = tokio::spawn(listen(Arc::downgrade(&inner), events));
        *inner.listener.lock().await = Some(handle);

        let session = inner.current_session().await;
        inner.resync(session).await;

        let ctx = Self { inner };
        match ctx.snapshot().user() {
            Some(user) => info!("Auth context ready, signed in as {}", user.id),
            None => info!("Auth context ready, anonymous"),
        }
        ctx
    }

    /// Stops reacting to backend auth events. Later responses are ignored.
    pub async fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.listener.lock().await.take() {
            handle.abort();
        }
        info!("Auth context detached");
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.snapshot().user().cloned()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.snapshot().profile().cloned()
    }

    /// Re-reads the backend session and resyncs.
    pub async fn refresh(&self) {
        let session = self.inner.current_session().await;
        self.inner.resync(session).await;
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> Result<(), AppError> {
        let metadata = UserMetadata {
            name: Some(name.to_string()),
            role: Some(role),
        };
        match self.inner.backend.sign_up(email, password, &metadata).await {
            Ok(Some(session)) => {
                self.inner.resync(Some(session)).await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!("sign_up failed: {e}");
                Err(e.into())
            }
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AppError> {
        match self.inner.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                self.inner.resync(Some(session)).await;
                Ok(())
            }
            Err(e) => {
                error!("sign_in failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Backend sign-out is fire-and-forget; the local mirror is cleared
    /// before this returns whatever the backend answered.
    pub async fn sign_out(&self) {
        let ticket = self.inner.fence.issue();
        if let Err(e) = self.inner.backend.sign_out().await {
            error!("sign_out error: {e}");
        }
        self.inner.apply(ticket, AuthState::Anonymous).await;
    }

    /// Writes the owner-editable fields plus a fresh `updated_at`, then
    /// re-reads the row. The re-read, not the payload, becomes local state.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), AppError> {
        let Some(user_id) = self.snapshot().user_id() else {
            return Err(AppError::Unauthenticated("Not authenticated".to_string()));
        };

        let mut payload = serde_json::to_value(update).map_err(BackendError::from)?;
        payload["updated_at"] = json!(clock::now());
        let query = Query::table(PROFILES_TABLE)
            .update(payload)
            .eq("id", user_id);
        if let Err(e) = self.inner.backend.execute(&query).await {
            error!("update_profile failed: {e}");
            return Err(e.into());
        }

        let ticket = self.inner.fence.issue();
        let fresh = fetch_profile(self.inner.backend.as_ref(), user_id).await;
        if let AuthState::Authenticated { session, .. } = self.snapshot() {
            if session.user.id == user_id {
                self.inner
                    .apply(
                        ticket,
                        AuthState::Authenticated {
                            session,
                            profile: fresh,
                        },
                    )
                    .await;
            }
        }
        Ok(())
    }
}
