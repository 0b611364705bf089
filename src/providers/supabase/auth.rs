// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! GoTrue endpoints.

use reqwest::{Method, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::SupabaseClient;
use crate::auth::session::unix_now;
use crate::auth::{AuthError, Session};
use crate::backend::{AuthBackend, SignUpOutcome};

const TOKEN_PATH: &str = "/auth/v1/token";
const SIGNUP_PATH: &str = "/auth/v1/signup";
const LOGOUT_PATH: &str = "/auth/v1/logout?scope=local";

/// Which call produced an error response; the same status means different
/// things on different endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthCall {
    SignIn,
    SignUp,
    Refresh,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl SupabaseClient {
    async fn token_grant(
        &self,
        grant_type: &str,
        body: Value,
        call: AuthCall,
    ) -> Result<Session, AuthError> {
        let path = format!("{TOKEN_PATH}?grant_type={grant_type}");
        let response = self
            .request(Method::POST, &path, None)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(format!("token request failed: {e}")))?;

        let body = auth_json(response, call).await?;
        let tokens: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AuthError::Request(format!("invalid token response: {e}")))?;
        Session::from_tokens(tokens.access_token, tokens.refresh_token)
    }
}

impl AuthBackend for SupabaseClient {
    async fn restore_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(file) = &self.session_file else {
            return Ok(None);
        };
        let Some(persisted) = file.load()? else {
            return Ok(None);
        };

        let session = match Session::from_tokens(persisted.access_token, persisted.refresh_token) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Persisted session is unreadable, discarding");
                self.forget();
                return Ok(None);
            }
        };

        if !session.is_expired(unix_now()) {
            return Ok(Some(session));
        }

        info!(user_id = %session.user_id, "Persisted access token expired, refreshing");
        match self.refresh(&session).await {
            Ok(refreshed) => {
                self.persist(&refreshed);
                Ok(Some(refreshed))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(error = %e, "Persisted session could not be refreshed, discarding");
                self.forget();
                Ok(None)
            }
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.token_grant(
            "password",
            json!({ "email": email, "password": password }),
            AuthCall::SignIn,
        )
        .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .request(Method::POST, SIGNUP_PATH, None)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| AuthError::Request(format!("sign-up request failed: {e}")))?;

        let body = auth_json(response, AuthCall::SignUp).await?;
        signup_outcome(body, email)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AuthError> {
        let response = self
            .request(Method::POST, LOGOUT_PATH, Some(&session.access_token))
            .send()
            .await
            .map_err(|e| AuthError::Request(format!("sign-out request failed: {e}")))?;

        let status = response.status().as_u16();
        // 401/404: the session is already gone on the server.
        if response.status().is_success() || status == 401 || status == 404 {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Rejected {
            status,
            message: error_message(&body),
        })
    }

    async fn refresh(&self, session: &Session) -> Result<Session, AuthError> {
        self.token_grant(
            "refresh_token",
            json!({ "refresh_token": session.refresh_token }),
            AuthCall::Refresh,
        )
        .await
    }

    fn remember(&self, session: Option<&Session>) {
        match session {
            Some(session) => self.persist(session),
            None => self.forget(),
        }
    }
}

async fn auth_json(response: Response, call: AuthCall) -> Result<Value, AuthError> {
    let status = response.status().as_u16();
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_rejection(call, status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| AuthError::Request(format!("invalid auth response: {e}")))
}

/// A sign-up response holds a session when the project confirms accounts
/// automatically, and only the user otherwise.
fn signup_outcome(body: Value, email: &str) -> Result<SignUpOutcome, AuthError> {
    let access = body.get("access_token").and_then(Value::as_str);
    let refresh = body.get("refresh_token").and_then(Value::as_str);
    match (access, refresh) {
        (Some(access), Some(refresh)) => {
            Ok(SignUpOutcome::SignedIn(Session::from_tokens(access, refresh)?))
        }
        _ => Ok(SignUpOutcome::ConfirmationRequired {
            email: email.to_string(),
        }),
    }
}

/// Map a GoTrue error response to an `AuthError`.
///
/// Newer servers send `error_code`; older ones only `error` and a message.
fn map_rejection(call: AuthCall, status: u16, body: &str) -> AuthError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed
        .get("error_code")
        .or_else(|| parsed.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = error_message(body);
    let lowered = message.to_ascii_lowercase();

    if code == "email_not_confirmed" || lowered.contains("email not confirmed") {
        return AuthError::EmailNotConfirmed;
    }
    if code == "user_already_exists" || lowered.contains("already registered") {
        return AuthError::UserAlreadyRegistered;
    }

    match (call, status) {
        (AuthCall::Refresh, 400 | 401) => AuthError::SessionExpired,
        (AuthCall::SignIn, 400) => AuthError::InvalidCredentials,
        _ => AuthError::Rejected { status, message },
    }
}

fn error_message(body: &str) -> String {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    ["msg", "error_description", "message"]
        .iter()
        .find_map(|field| parsed.get(*field).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
