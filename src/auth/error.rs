// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

/// Authentication error type.
///
/// Returned by the auth backend and the session monitor. Transport failures
/// keep the provider's message so the user sees why the call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// An operation needed a session and there is none
    NotSignedIn,
    /// Email/password pair was rejected
    InvalidCredentials,
    /// Account exists but its email address is not confirmed yet
    EmailNotConfirmed,
    /// Sign-up with an email that already has an account
    UserAlreadyRegistered,
    /// Refresh token is no longer accepted; the user must sign in again
    SessionExpired,
    /// The session changed while the call was in flight; its result was dropped
    SessionSuperseded,
    /// Access token could not be decoded
    MalformedToken,
    /// Reading or writing the persisted session failed
    Persistence(String),
    /// Backend could not be reached
    Request(String),
    /// Backend answered with an unexpected error
    Rejected { status: u16, message: String },
}

impl AuthError {
    /// Get the stable error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NotSignedIn => "not_signed_in",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailNotConfirmed => "email_not_confirmed",
            AuthError::UserAlreadyRegistered => "user_already_registered",
            AuthError::SessionExpired => "session_expired",
            AuthError::SessionSuperseded => "session_superseded",
            AuthError::MalformedToken => "malformed_token",
            AuthError::Persistence(_) => "persistence_error",
            AuthError::Request(_) => "request_error",
            AuthError::Rejected { .. } => "rejected",
        }
    }

    /// Whether retrying the same call later could succeed.
    ///
    /// 429 is GoTrue's rate limit.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Request(_) => true,
            AuthError::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::NotSignedIn => write!(f, "Not signed in"),
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::EmailNotConfirmed => {
                write!(f, "Email address not confirmed; check your inbox for the confirmation link")
            }
            AuthError::UserAlreadyRegistered => write!(f, "An account with this email already exists"),
            AuthError::SessionExpired => write!(f, "Session expired; please sign in again"),
            AuthError::SessionSuperseded => write!(f, "Session changed while the request was in flight"),
            AuthError::MalformedToken => write!(f, "Access token is malformed"),
            AuthError::Persistence(msg) => write!(f, "Failed to persist session: {msg}"),
            AuthError::Request(msg) => write!(f, "Authentication request failed: {msg}"),
            AuthError::Rejected { status, message } => {
                write!(f, "Authentication rejected ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for AuthError {}
