// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session and access-token claims.

use serde::{Deserialize, Serialize};

use super::AuthError;

/// Clock skew tolerance (60 seconds).
pub const CLOCK_SKEW_LEEWAY: i64 = 60;

/// Claims carried by a backend access token.
///
/// Only the fields the client needs are decoded. The signature is not
/// verified here; the backend checks it on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Issued at timestamp
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// An authenticated identity.
///
/// This is the only credential the rest of the crate sees: the user ID scopes
/// every record and blob operation, and the access token authorizes them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Access token expiry (Unix timestamp)
    pub expires_at: i64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Build a session from a token pair by decoding the access token claims.
    pub fn from_tokens(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token: refresh_token.into(),
            user_id: claims.sub,
            email: claims.email,
            expires_at: claims.exp,
        })
    }

    /// Whether the access token has expired, allowing for clock skew.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at > 0 && self.expires_at < now - CLOCK_SKEW_LEEWAY
    }
}

/// Decode access token claims without verifying the signature.
pub fn decode_claims(token: &str) -> Result<AccessClaims, AuthError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<AccessClaims>(token)
        .map_err(|_| AuthError::MalformedToken)?;

    if token_data.claims.sub.trim().is_empty() {
        return Err(AuthError::MalformedToken);
    }
    Ok(token_data.claims)
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
