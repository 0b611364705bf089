// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory backend.
//!
//! Implements all three backend traits against process memory. Used by the
//! test suite and for running the client without a remote service. Besides
//! the traits it exposes a call log, one-shot failure injection and gates for
//! holding an insert or a token refresh mid-flight.
//!
//! State sits behind a `std::sync::Mutex`; no guard is ever held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::auth::{AccessClaims, AuthError, Session};
use crate::backend::{AuthBackend, Filter, ObjectBackend, Query, SignUpOutcome, TableBackend};
use crate::error::ProviderError;

const SIGNING_SECRET: &[u8] = b"memory-backend-signing-secret";
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const PUBLIC_BASE: &str = "https://memory.invalid/storage/v1/object/public";

/// A data-plane call observed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Select { table: String, filter: Filter },
    Insert { table: String },
    Delete { table: String, filter: Filter },
    Upload { bucket: String, key: String },
    Remove { bucket: String, keys: Vec<String> },
}

/// Operation a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Select,
    Insert,
    Delete,
    Upload,
    Remove,
}

/// Handle on a call held by [`MemoryBackend::hold_inserts`] or
/// [`MemoryBackend::hold_refreshes`].
#[derive(Clone)]
pub struct CallGate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl CallGate {
    fn new() -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Wait until the held call reaches the gate.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let the held call proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.started.notify_one();
        self.release.notified().await;
    }
}

struct Account {
    user_id: String,
    password: String,
    confirmed: bool,
}

struct MemoryState {
    /// Accounts keyed by email
    accounts: HashMap<String, Account>,
    persisted: Option<Session>,
    token_lifetime: Duration,
    refresh_tokens_expired: bool,
    refresh_failure: Option<AuthError>,
    /// Refresh attempts, failed ones included
    refreshes: u64,
    fail_sign_out: bool,
    require_confirmation: bool,

    tables: HashMap<String, Vec<Value>>,
    next_id: i64,
    last_created_at: Option<DateTime<Utc>>,
    ignore_filters: bool,

    objects: HashMap<(String, String), Vec<u8>>,

    calls: Vec<BackendCall>,
    failures: HashMap<FailurePoint, String>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            persisted: None,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            refresh_tokens_expired: false,
            refresh_failure: None,
            refreshes: 0,
            fail_sign_out: false,
            require_confirmation: false,
            tables: HashMap::new(),
            next_id: 1,
            last_created_at: None,
            ignore_filters: false,
            objects: HashMap::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
        }
    }
}

impl MemoryState {
    fn take_failure(&mut self, point: FailurePoint) -> Result<(), ProviderError> {
        match self.failures.remove(&point) {
            Some(message) => Err(ProviderError::Injected(message)),
            None => Ok(()),
        }
    }

    /// Strictly increasing creation timestamps, even within one clock tick.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp
    }

    fn mint_session(&self, user_id: &str) -> Result<Session, AuthError> {
        let email = self
            .accounts
            .iter()
            .find(|(_, account)| account.user_id == user_id)
            .map(|(email, _)| email.clone());

        let now = Utc::now().timestamp();
        let lifetime = i64::try_from(self.token_lifetime.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessClaims {
            sub: user_id.to_string(),
            exp: now.saturating_add(lifetime),
            iat: now,
            email: email.clone(),
            session_id: Some(Uuid::new_v4().to_string()),
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SIGNING_SECRET),
        )
        .map_err(|e| AuthError::Request(format!("failed to sign access token: {e}")))?;

        Ok(Session {
            access_token,
            refresh_token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            email,
            expires_at: claims.exp,
        })
    }
}

/// Backend held entirely in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    insert_gate: Mutex<Option<CallGate>>,
    refresh_gate: Mutex<Option<CallGate>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Register a confirmed account.
    pub fn register_user(&self, user_id: &str, email: &str, password: &str) {
        self.state().accounts.insert(
            email.to_string(),
            Account {
                user_id: user_id.to_string(),
                password: password.to_string(),
                confirmed: true,
            },
        );
    }

    /// Make sign-up send a confirmation instead of opening a session.
    pub fn require_email_confirmation(&self, required: bool) {
        self.state().require_confirmation = required;
    }

    /// Mint a fresh session for a user without going through sign-in.
    pub fn issue_session(&self, user_id: &str) -> Result<Session, AuthError> {
        self.state().mint_session(user_id)
    }

    /// Store a session to be returned by `restore_session`.
    pub fn persist_session(&self, session: Session) {
        self.state().persisted = Some(session);
    }

    /// The session last handed to [`AuthBackend::remember`].
    pub fn persisted_session(&self) -> Option<Session> {
        self.state().persisted.clone()
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.state().fail_sign_out = fail;
    }

    /// Reject every refresh token from now on.
    pub fn expire_refresh_tokens(&self) {
        self.state().refresh_tokens_expired = true;
    }

    /// Fail every refresh with `error` until cleared with `None`.
    pub fn fail_refreshes(&self, error: Option<AuthError>) {
        self.state().refresh_failure = error;
    }

    pub fn set_token_lifetime(&self, lifetime: Duration) {
        self.state().token_lifetime = lifetime;
    }

    pub fn refresh_count(&self) -> u64 {
        self.state().refreshes
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Insert a row verbatim, bypassing ownership checks.
    pub fn seed_row(&self, table: &str, row: Value) {
        let mut state = self.state();
        if let Some(id) = row.get("id").and_then(Value::as_i64) {
            state.next_id = state.next_id.max(id + 1);
        }
        state.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Return rows without applying select filters, like a backend with a
    /// broken access policy.
    pub fn ignore_filters(&self, ignore: bool) {
        self.state().ignore_filters = ignore;
    }

    // =========================================================================
    // Instrumentation
    // =========================================================================

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Fail the next call at `point` with `message`.
    pub fn fail_next(&self, point: FailurePoint, message: &str) {
        self.state().failures.insert(point, message.to_string());
    }

    pub fn fail_next_select(&self, message: &str) {
        self.fail_next(FailurePoint::Select, message);
    }

    pub fn fail_next_insert(&self, message: &str) {
        self.fail_next(FailurePoint::Insert, message);
    }

    pub fn fail_next_delete(&self, message: &str) {
        self.fail_next(FailurePoint::Delete, message);
    }

    pub fn fail_next_upload(&self, message: &str) {
        self.fail_next(FailurePoint::Upload, message);
    }

    pub fn fail_next_remove(&self, message: &str) {
        self.fail_next(FailurePoint::Remove, message);
    }

    /// Hold the next insert until the returned gate is released.
    pub fn hold_inserts(&self) -> CallGate {
        arm(&self.insert_gate)
    }

    /// Hold the next token refresh until the returned gate is released.
    pub fn hold_refreshes(&self) -> CallGate {
        arm(&self.refresh_gate)
    }
}

fn arm(slot: &Mutex<Option<CallGate>>) -> CallGate {
    let gate = CallGate::new();
    *lock_gate(slot) = Some(gate.clone());
    gate
}

fn take_gate(slot: &Mutex<Option<CallGate>>) -> Option<CallGate> {
    lock_gate(slot).take()
}

fn lock_gate(slot: &Mutex<Option<CallGate>>) -> MutexGuard<'_, Option<CallGate>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AuthBackend for MemoryBackend {
    async fn restore_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state().persisted.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let mut state = self.state();
        let user_id = match state.accounts.get(email) {
            Some(account) if account.password == password => {
                if !account.confirmed {
                    return Err(AuthError::EmailNotConfirmed);
                }
                account.user_id.clone()
            }
            _ => return Err(AuthError::InvalidCredentials),
        };

        state.mint_session(&user_id)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let mut state = self.state();
        if state.accounts.contains_key(email) {
            return Err(AuthError::UserAlreadyRegistered);
        }

        let user_id = Uuid::new_v4().to_string();
        let confirmed = !state.require_confirmation;
        state.accounts.insert(
            email.to_string(),
            Account {
                user_id: user_id.clone(),
                password: password.to_string(),
                confirmed,
            },
        );

        if !confirmed {
            return Ok(SignUpOutcome::ConfirmationRequired {
                email: email.to_string(),
            });
        }

        Ok(SignUpOutcome::SignedIn(state.mint_session(&user_id)?))
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), AuthError> {
        if self.state().fail_sign_out {
            return Err(AuthError::Request("sign-out rejected".to_string()));
        }
        Ok(())
    }

    async fn refresh(&self, session: &Session) -> Result<Session, AuthError> {
        self.state().refreshes += 1;
        if let Some(gate) = take_gate(&self.refresh_gate) {
            gate.pass().await;
        }

        let state = self.state();
        if state.refresh_tokens_expired {
            return Err(AuthError::SessionExpired);
        }
        if let Some(error) = &state.refresh_failure {
            return Err(error.clone());
        }
        state.mint_session(&session.user_id)
    }

    fn remember(&self, session: Option<&Session>) {
        self.state().persisted = session.cloned();
    }
}

impl TableBackend for MemoryBackend {
    async fn select(
        &self,
        _session: &Session,
        table: &str,
        query: &Query,
    ) -> Result<Vec<Value>, ProviderError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Select {
            table: table.to_string(),
            filter: query.filter.clone(),
        });
        state.take_failure(FailurePoint::Select)?;

        let ignore_filters = state.ignore_filters;
        let mut rows: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| ignore_filters || query.filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        session: &Session,
        table: &str,
        row: Value,
    ) -> Result<Value, ProviderError> {
        {
            let mut state = self.state();
            state.calls.push(BackendCall::Insert {
                table: table.to_string(),
            });
            state.take_failure(FailurePoint::Insert)?;
        }

        if let Some(gate) = take_gate(&self.insert_gate) {
            gate.pass().await;
        }

        let Value::Object(mut fields) = row else {
            return Err(ProviderError::InvalidResponse(
                "insert body must be an object".to_string(),
            ));
        };
        if fields.get("user_id").and_then(Value::as_str) != Some(session.user_id.as_str()) {
            return Err(ProviderError::Status {
                operation: format!("insert into {table}"),
                status: 403,
                body: "new row violates row-level security policy".to_string(),
            });
        }

        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        let created_at = state
            .next_created_at()
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        fields.insert("id".to_string(), Value::from(id));
        fields.insert("created_at".to_string(), Value::String(created_at));
        fields.entry("image_url").or_insert(Value::Null);

        let stored = Value::Object(fields);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        _session: &Session,
        table: &str,
        filter: &Filter,
    ) -> Result<u64, ProviderError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Delete {
            table: table.to_string(),
            filter: filter.clone(),
        });
        state.take_failure(FailurePoint::Delete)?;

        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok((before - rows.len()) as u64)
    }
}

impl ObjectBackend for MemoryBackend {
    async fn upload(
        &self,
        session: &Session,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Upload {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state.take_failure(FailurePoint::Upload)?;

        let operation = format!("upload to {bucket}");
        if !key.starts_with(&format!("{}/", session.user_id)) {
            return Err(ProviderError::Status {
                operation,
                status: 403,
                body: "object key outside the user's folder".to_string(),
            });
        }

        let slot = (bucket.to_string(), key.to_string());
        if state.objects.contains_key(&slot) {
            return Err(ProviderError::Status {
                operation,
                status: 409,
                body: "The resource already exists".to_string(),
            });
        }
        state.objects.insert(slot, bytes);
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{PUBLIC_BASE}/{bucket}/{key}")
    }

    async fn remove(
        &self,
        _session: &Session,
        bucket: &str,
        keys: &[String],
    ) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Remove {
            bucket: bucket.to_string(),
            keys: keys.to_vec(),
        });
        state.take_failure(FailurePoint::Remove)?;

        for key in keys {
            state.objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
