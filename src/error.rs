// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy surfaced by roster operations.

use crate::auth::AuthError;
use crate::models::RecordId;

/// Failure of a roster operation.
///
/// `Validation` is always raised before any side effect. `Backend` and
/// `Storage` name the remote subsystem that failed, so callers can tell a
/// failed row write from a failed blob write.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Record store request failed: {0}")]
    Backend(String),

    #[error("Image storage request failed: {0}")]
    Storage(String),

    #[error("Record {0} not found")]
    NotFound(RecordId),

    #[error("You must be signed in to do that")]
    Unauthenticated,

    #[error("The session changed before the operation finished")]
    SessionChanged,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl RosterError {
    /// Whether the failure should be shown to the user as a state annotation.
    ///
    /// Results discarded because the session moved on belong to a view that
    /// no longer exists.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, RosterError::SessionChanged)
    }
}

/// Error returned by a backend provider before it is attributed to a subsystem.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("response was invalid: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Injected(String),
}

pub type RosterResult<T> = Result<T, RosterError>;
