// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Supabase backend.
//!
//! One HTTP client for the three services a Supabase project exposes:
//!
//! - GoTrue auth under `/auth/v1` (see `auth.rs`)
//! - PostgREST tables under `/rest/v1` (see `rest.rs`)
//! - Storage buckets under `/storage/v1` (see `storage.rs`)
//!
//! Every request carries the project's anon key as `apikey`; data requests
//! are authorized with the session's access token, so row-level security
//! applies to the signed-in user.

mod auth;
mod rest;
mod storage;

use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::warn;

use crate::auth::{Session, SessionFile};
use crate::config::ClientConfig;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    api_url: String,
    anon_key: String,
    session_file: Option<SessionFile>,
    http: Client,
}

impl SupabaseClient {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: config.api_url.as_str().trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session_file: config.session_file.as_ref().map(SessionFile::new),
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Request carrying the anon key, authorized as `bearer` (or as the anon
    /// role when there is no session).
    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.anon_key);
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
    }

    fn authorized(&self, method: Method, path: &str, session: &Session) -> RequestBuilder {
        self.request(method, path, Some(&session.access_token))
    }

    fn persist(&self, session: &Session) {
        if let Some(file) = &self.session_file {
            if let Err(e) = file.save(session) {
                warn!(error = %e, "Failed to persist session");
            }
        }
    }

    fn forget(&self) {
        if let Some(file) = &self.session_file {
            if let Err(e) = file.clear() {
                warn!(error = %e, "Failed to clear persisted session");
            }
        }
    }
}

/// Turn a non-success response into `ProviderError::Status`.
async fn expect_success(response: Response, operation: &str) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        operation: operation.to_string(),
        status,
        body,
    })
}

fn transport(operation: &str, e: reqwest::Error) -> ProviderError {
    ProviderError::Request(format!("{operation} failed: {e}"))
}
