// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Backend boundary.
//!
//! The remote service is consumed through three traits: authentication,
//! structured rows and binary objects. The gateways and the session monitor
//! only ever talk to these traits, so the Supabase client and the in-memory
//! backend are interchangeable.

use std::future::Future;

use serde_json::Value;

use crate::auth::{AuthError, Session};
use crate::error::ProviderError;

/// Result of a sign-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The backend confirmed the account immediately and opened a session.
    SignedIn(Session),
    /// A confirmation link was sent; no session exists until it is followed.
    ConfirmationRequired { email: String },
}

/// Equality filter over table columns. All conditions must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Whether a row satisfies every condition.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(column, expected)| row.get(column) == Some(expected))
    }
}

/// Sort order for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A select against one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order: Option<Order>,
}

/// Authentication service.
pub trait AuthBackend: Send + Sync + 'static {
    /// Session persisted by a previous run, if still usable.
    fn restore_session(&self) -> impl Future<Output = Result<Option<Session>, AuthError>> + Send;

    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, AuthError>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<SignUpOutcome, AuthError>> + Send;

    fn sign_out(&self, session: &Session) -> impl Future<Output = Result<(), AuthError>> + Send;

    /// Exchange the session's refresh token for a new access token.
    ///
    /// Nothing is persisted; the caller decides whether the result still
    /// applies and then calls [`AuthBackend::remember`].
    fn refresh(&self, session: &Session) -> impl Future<Output = Result<Session, AuthError>> + Send;

    /// Persist the session the client now holds, or forget it on `None`.
    fn remember(&self, session: Option<&Session>);
}

/// Structured row store.
pub trait TableBackend: Send + Sync + 'static {
    fn select(
        &self,
        session: &Session,
        table: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Value>, ProviderError>> + Send;

    /// Insert one row and return it as stored (with backend-assigned fields).
    fn insert(
        &self,
        session: &Session,
        table: &str,
        row: Value,
    ) -> impl Future<Output = Result<Value, ProviderError>> + Send;

    /// Delete every row matching the filter and return how many went.
    fn delete(
        &self,
        session: &Session,
        table: &str,
        filter: &Filter,
    ) -> impl Future<Output = Result<u64, ProviderError>> + Send;
}

/// Binary object store.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Store bytes under `key` without overwriting; returns the stored key.
    fn upload(
        &self,
        session: &Session,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;

    /// Public retrieval address for a key. Pure; never touches the network.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// Remove objects. Keys that do not exist are ignored.
    fn remove(
        &self,
        session: &Session,
        bucket: &str,
        keys: &[String],
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// A backend offering all three services.
pub trait RemoteBackend: AuthBackend + TableBackend + ObjectBackend {}

impl<T: AuthBackend + TableBackend + ObjectBackend> RemoteBackend for T {}
