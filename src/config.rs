// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Client configuration is loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SUPABASE_URL` | Backend base URL | Required |
//! | `SUPABASE_ANON_KEY` | Public (anon) API key | Required |
//! | `ROSTER_RECORDS_TABLE` | Table holding roster records | `students` |
//! | `ROSTER_ASSET_BUCKET` | Storage bucket for record images | `student-image` |
//! | `ROSTER_STORE_ASSET_KEYS` | Write the storage key next to the image URL | `true` |
//! | `ROSTER_SESSION_FILE` | File used to persist the signed-in session | Unset (no persistence) |
//! | `ROSTER_REQUEST_TIMEOUT_SECS` | HTTP request timeout | `15` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";
pub const RECORDS_TABLE_ENV: &str = "ROSTER_RECORDS_TABLE";
pub const ASSET_BUCKET_ENV: &str = "ROSTER_ASSET_BUCKET";
pub const STORE_ASSET_KEYS_ENV: &str = "ROSTER_STORE_ASSET_KEYS";
pub const SESSION_FILE_ENV: &str = "ROSTER_SESSION_FILE";
pub const REQUEST_TIMEOUT_ENV: &str = "ROSTER_REQUEST_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_RECORDS_TABLE: &str = "students";
pub const DEFAULT_ASSET_BUCKET: &str = "student-image";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env_optional(LOG_FORMAT_ENV).as_deref() {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Names of the remote collections the roster lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub records_table: String,
    pub asset_bucket: String,
    /// Persist the storage key in the record row so deletion does not need
    /// to parse it back out of the public address.
    pub store_asset_keys: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            records_table: DEFAULT_RECORDS_TABLE.to_string(),
            asset_bucket: DEFAULT_ASSET_BUCKET.to_string(),
            store_asset_keys: true,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub anon_key: String,
    pub collections: CollectionConfig,
    pub session_file: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = env_required(SUPABASE_URL_ENV)?;
        let api_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
            name: SUPABASE_URL_ENV,
            reason: e.to_string(),
        })?;
        let anon_key = env_required(SUPABASE_ANON_KEY_ENV)?;

        let collections = CollectionConfig {
            records_table: env_or_default(RECORDS_TABLE_ENV, DEFAULT_RECORDS_TABLE),
            asset_bucket: env_or_default(ASSET_BUCKET_ENV, DEFAULT_ASSET_BUCKET),
            store_asset_keys: parse_flag(STORE_ASSET_KEYS_ENV, true)?,
        };

        let request_timeout = match env_optional(REQUEST_TIMEOUT_ENV) {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: REQUEST_TIMEOUT_ENV,
                    reason: format!("expected whole seconds, got {raw:?}"),
                })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Self {
            api_url,
            anon_key,
            collections,
            session_file: env_optional(SESSION_FILE_ENV).map(PathBuf::from),
            request_timeout,
        })
    }
}

fn parse_flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = env_optional(name) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got {raw:?}"),
        }),
    }
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_optional(name).ok_or(ConfigError::Missing(name))
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}
