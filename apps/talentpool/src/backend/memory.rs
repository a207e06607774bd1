//! In-process backend.
//!
//! [`MemoryServer`] holds the shared world: identities, table rows and stored
//! objects. Each [`MemoryBackend`] obtained from [`MemoryServer::connect`] is
//! one client of that world with its own session, so tests can sign in a
//! candidate and a recruiter side by side.
//!
//! Table behaviour mirrors what callers rely on from the hosted service:
//! generated ids and timestamps, unique constraints reported as SQLSTATE
//! `23505`, merge-on-conflict upserts, foreign-key embeds and write denial
//! shaped like a row-level-security rejection.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::backend::query::{Column, Filter, Operation, Query};
use crate::backend::{
    AuthChangeEvent, AuthEvent, Backend, BackendError, AUTH_EVENT_CAPACITY, UNIQUE_VIOLATION,
};
use crate::clock;
use crate::models::session::{Session, User, UserMetadata};

pub const PASSWORD_MIN_LENGTH: usize = 6;
const DEFAULT_BASE_URL: &str = "http://localhost:54321";
const DEFAULT_SESSION_TTL_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

type Row = Map<String, Value>;

struct StoredUser {
    user: User,
    password: String,
    confirmed: bool,
}

#[derive(Clone)]
struct StoredObject {
    content_type: String,
    body: Bytes,
}

#[derive(Default)]
struct World {
    users: HashMap<String, StoredUser>,
    tables: HashMap<String, Vec<Row>>,
    objects: HashMap<(String, String), StoredObject>,
    write_denied: HashSet<String>,
}

pub struct MemoryServer {
    world: Mutex<World>,
    require_confirmation: bool,
    session_ttl_secs: i64,
    base_url: String,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self {
            world: Mutex::new(World::default()),
            require_confirmation: false,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// New identities must confirm their email before they can sign in.
    pub fn with_email_confirmation() -> Arc<Self> {
        Arc::new(Self {
            require_confirmation: true,
            ..Self::default()
        })
    }

    pub fn with_session_ttl(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            session_ttl_secs: secs,
            ..Self::default()
        })
    }

    pub fn connect(self: &Arc<Self>) -> MemoryBackend {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        MemoryBackend {
            server: Arc::clone(self),
            session: RwLock::new(None),
            events,
            fail_next_sign_out: AtomicBool::new(false),
        }
    }

    /// Rejects every write to `table` the way a row-level-security policy would.
    pub async fn deny_writes(&self, table: &str) {
        self.world.lock().await.write_denied.insert(table.to_string());
    }

    pub async fn allow_writes(&self, table: &str) {
        self.world.lock().await.write_denied.remove(table);
    }

    pub async fn confirm_email(&self, email: &str) {
        if let Some(stored) = self.world.lock().await.users.get_mut(&email.to_lowercase()) {
            stored.confirmed = true;
        }
    }

    /// Creates a confirmed identity directly, bypassing sign-up validation.
    pub async fn create_user(&self, email: &str, password: &str, metadata: UserMetadata) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: metadata,
        };
        self.world.lock().await.users.insert(
            email.to_lowercase(),
            StoredUser {
                user: user.clone(),
                password: password.to_string(),
                confirmed: true,
            },
        );
        user
    }

    pub async fn table_rows(&self, table: &str) -> Vec<Value> {
        self.world
            .lock()
            .await
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub async fn object(&self, bucket: &str, path: &str) -> Option<(String, Bytes)> {
        self.world
            .lock()
            .await
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| (o.content_type.clone(), o.body.clone()))
    }

    fn new_session(&self, user: User) -> Session {
        Session {
            access_token: format!("memory-{}", Uuid::new_v4()),
            refresh_token: format!("memory-refresh-{}", Uuid::new_v4()),
            token_type: "bearer".to_string(),
            expires_at: Utc::now().timestamp() + self.session_ttl_secs,
            user,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Table engine
// ────────────────────────────────────────────────────────────────────────────

fn unique_keys(table: &str) -> &'static [&'static [&'static str]] {
    match table {
        "applications" => &[&["id"], &["job_id", "candidate_id"]],
        "candidate_cvs" => &[&["id"], &["user_id"]],
        _ => &[&["id"]],
    }
}

fn apply_defaults(table: &str, row: &mut Row) {
    let missing = |row: &Row, key: &str| row.get(key).map_or(true, Value::is_null);
    if missing(row, "id") {
        row.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    let stamp = Value::String(clock::now().to_rfc3339());
    match table {
        "candidate_cvs" => {
            if missing(row, "uploaded_at") {
                row.insert("uploaded_at".into(), stamp);
            }
        }
        _ => {
            if missing(row, "created_at") {
                row.insert("created_at".into(), stamp.clone());
            }
            if missing(row, "updated_at") {
                row.insert("updated_at".into(), stamp);
            }
        }
    }
    if table == "applications" && missing(row, "status") {
        row.insert("status".into(), Value::String("pending".into()));
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let Some(actual) = row.get(filter.column()).map(value_text) else {
            return false;
        };
        match filter {
            Filter::Eq(_, expected) => &actual == expected,
            Filter::In(_, expected) => expected.contains(&actual),
        }
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (
                DateTime::parse_from_rfc3339(a),
                DateTime::parse_from_rfc3339(b),
            ) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => value_text(a).cmp(&value_text(b)),
    }
}

fn key_of(row: &Row, columns: &[&str]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|c| row.get(*c).filter(|v| !v.is_null()).map(value_text))
        .collect()
}

fn unique_violation(table: &str, columns: &[&str]) -> BackendError {
    BackendError::api(
        409,
        Some(UNIQUE_VIOLATION),
        format!(
            "duplicate key value violates unique constraint \"{table}_{}_key\"",
            columns.join("_")
        ),
    )
}

fn as_row(value: &Value) -> Result<Row, BackendError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| BackendError::api(400, Some("PGRST102"), "Row payload must be a JSON object"))
}

impl World {
    fn check_unique(&self, table: &str, candidate: &Row, skip: Option<usize>) -> Result<(), BackendError> {
        let rows = self.tables.get(table).map(Vec::as_slice).unwrap_or_default();
        for columns in unique_keys(table) {
            let Some(key) = key_of(candidate, columns) else {
                continue;
            };
            let clash = rows
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip && key_of(row, columns).as_ref() == Some(&key));
            if clash {
                return Err(unique_violation(table, columns));
            }
        }
        Ok(())
    }

    fn insert_row(&mut self, table: &str, mut row: Row) -> Result<Row, BackendError> {
        apply_defaults(table, &mut row);
        self.check_unique(table, &row, None)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    fn project(&self, row: &Row, columns: &[Column]) -> Value {
        let mut out = if columns.contains(&Column::All) {
            row.clone()
        } else {
            Row::new()
        };
        for column in columns {
            match column {
                Column::All => {}
                Column::Named(name) => {
                    if let Some(value) = row.get(name) {
                        out.insert(name.clone(), value.clone());
                    }
                }
                Column::Embed(embed) => {
                    let target = row.get(&embed.fk_column).map(value_text);
                    let related = target.and_then(|id| {
                        self.tables.get(&embed.table).and_then(|rows| {
                            rows.iter()
                                .find(|r| r.get("id").map(value_text).as_deref() == Some(id.as_str()))
                        })
                    });
                    let value = match related {
                        Some(related) => {
                            let mut picked = Row::new();
                            for name in &embed.columns {
                                if name == "*" {
                                    picked.extend(related.clone());
                                } else if let Some(v) = related.get(name) {
                                    picked.insert(name.clone(), v.clone());
                                }
                            }
                            Value::Object(picked)
                        }
                        None => Value::Null,
                    };
                    out.insert(embed.alias.clone(), value);
                }
            }
        }
        Value::Object(out)
    }

    fn run(&mut self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let table = query.table.as_str();
        if !query.is_read() && self.write_denied.contains(table) {
            return Err(BackendError::api(
                403,
                Some("42501"),
                format!("new row violates row-level security policy for table \"{table}\""),
            ));
        }

        let written: Vec<Row> = match &query.operation {
            Operation::Select => {
                let mut rows: Vec<Row> = self
                    .tables
                    .get(table)
                    .map(|rows| rows.iter().filter(|r| matches(r, &query.filters)).cloned().collect())
                    .unwrap_or_default();
                if let Some(order) = &query.order {
                    rows.sort_by(|a, b| {
                        let ord = compare_values(a.get(&order.column), b.get(&order.column));
                        if order.ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    });
                }
                return Ok(rows.iter().map(|r| self.project(r, &query.columns)).collect());
            }
            Operation::Insert(rows) => {
                let mut inserted = Vec::with_capacity(rows.len());
                for row in rows {
                    inserted.push(self.insert_row(table, as_row(row)?)?);
                }
                inserted
            }
            Operation::Update(patch) => {
                let patch = as_row(patch)?;
                let indices: Vec<usize> = self
                    .tables
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .enumerate()
                            .filter(|(_, r)| matches(r, &query.filters))
                            .map(|(i, _)| i)
                            .collect()
                    })
                    .unwrap_or_default();
                let mut updated = Vec::with_capacity(indices.len());
                for i in indices {
                    let mut next = self.tables[table][i].clone();
                    next.extend(patch.clone());
                    self.check_unique(table, &next, Some(i))?;
                    if let Some(rows) = self.tables.get_mut(table) {
                        rows[i] = next.clone();
                    }
                    updated.push(next);
                }
                updated
            }
            Operation::Upsert { rows, on_conflict } => {
                let conflict: Vec<&str> = on_conflict.split(',').map(str::trim).collect();
                let mut written = Vec::with_capacity(rows.len());
                for row in rows {
                    let row = as_row(row)?;
                    let key = key_of(&row, &conflict);
                    let existing = key.as_ref().and_then(|key| {
                        self.tables.get(table).and_then(|rows| {
                            rows.iter().position(|r| key_of(r, &conflict).as_ref() == Some(key))
                        })
                    });
                    match existing {
                        Some(i) => {
                            let mut next = self.tables[table][i].clone();
                            next.extend(row);
                            self.check_unique(table, &next, Some(i))?;
                            if let Some(rows) = self.tables.get_mut(table) {
                                rows[i] = next.clone();
                            }
                            written.push(next);
                        }
                        None => written.push(self.insert_row(table, row)?),
                    }
                }
                written
            }
            Operation::Delete => {
                let rows = self.tables.entry(table.to_string()).or_default();
                let (removed, kept): (Vec<Row>, Vec<Row>) = rows
                    .drain(..)
                    .partition(|r| matches(r, &query.filters));
                *rows = kept;
                removed
            }
        };

        if !query.returning {
            return Ok(Vec::new());
        }
        Ok(written.iter().map(|r| self.project(r, &query.columns)).collect())
    }
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

pub struct MemoryBackend {
    server: Arc<MemoryServer>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    fail_next_sign_out: AtomicBool,
}

impl MemoryBackend {
    /// Makes the next `sign_out` fail as if the network dropped, leaving the
    /// backend-side session untouched.
    pub fn fail_next_sign_out(&self) {
        self.fail_next_sign_out.store(true, AtomicOrdering::SeqCst);
    }

    async fn install(&self, session: Session, kind: AuthChangeEvent) {
        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthEvent {
            kind,
            session: Some(session),
        });
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let current = self.session.read().await.clone();
        match current {
            Some(session) if session.expires_within(Utc::now(), REFRESH_MARGIN_SECS) => {
                let fresh = self.server.new_session(session.user);
                self.install(fresh.clone(), AuthChangeEvent::TokenRefreshed)
                    .await;
                Ok(Some(fresh))
            }
            other => Ok(other),
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
        if !valid_email(email) {
            return Err(BackendError::api(
                400,
                Some("validation_failed"),
                "Unable to validate email address: invalid format",
            ));
        }
        if password.chars().count() < PASSWORD_MIN_LENGTH {
            return Err(BackendError::api(
                422,
                Some("weak_password"),
                format!("Password should be at least {PASSWORD_MIN_LENGTH} characters."),
            ));
        }

        let user = {
            let mut world = self.server.world.lock().await;
            let key = email.to_lowercase();
            if world.users.contains_key(&key) {
                return Err(BackendError::api(
                    422,
                    Some("user_already_exists"),
                    "User already registered",
                ));
            }
            let user = User {
                id: Uuid::new_v4(),
                email: Some(email.to_string()),
                user_metadata: metadata.clone(),
            };
            world.users.insert(
                key,
                StoredUser {
                    user: user.clone(),
                    password: password.to_string(),
                    confirmed: !self.server.require_confirmation,
                },
            );
            user
        };

        if self.server.require_confirmation {
            debug!("Identity {} created, awaiting confirmation", user.id);
            return Ok(None);
        }
        let session = self.server.new_session(user);
        self.install(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(Some(session))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let user = {
            let world = self.server.world.lock().await;
            let stored = world
                .users
                .get(&email.to_lowercase())
                .filter(|stored| stored.password == password)
                .ok_or_else(|| {
                    BackendError::api(400, Some("invalid_credentials"), "Invalid login credentials")
                })?;
            if !stored.confirmed {
                return Err(BackendError::api(
                    400,
                    Some("email_not_confirmed"),
                    "Email not confirmed",
                ));
            }
            stored.user.clone()
        };
        let session = self.server.new_session(user);
        self.install(session.clone(), AuthChangeEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.fail_next_sign_out.swap(false, AtomicOrdering::SeqCst) {
            return Err(BackendError::api(503, None, "Failed to fetch"));
        }
        *self.session.write().await = None;
        let _ = self.events.send(AuthEvent {
            kind: AuthChangeEvent::SignedOut,
            session: None,
        });
        Ok(())
    }

    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.server.world.lock().await.run(query)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        body: Bytes,
        upsert: bool,
    ) -> Result<(), BackendError> {
        let mut world = self.server.world.lock().await;
        let key = (bucket.to_string(), path.to_string());
        if !upsert && world.objects.contains_key(&key) {
            return Err(BackendError::api(409, Some("Duplicate"), "The resource already exists"));
        }
        world.objects.insert(
            key,
            StoredObject {
                content_type: content_type.to_string(),
                body,
            },
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.server.base_url, bucket, path
        )
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        let mut world = self.server.world.lock().await;
        for path in paths {
            world.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}
