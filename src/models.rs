// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Roster Data Models
//!
//! Records as they are stored in the remote table, the fields a caller
//! supplies to create one, and the binary payload of an image upload.
//!
//! ## Wire Mapping
//!
//! | Field | Column |
//! |-------|--------|
//! | `id` | `id` |
//! | `owner_id` | `user_id` |
//! | `display_name` | `name` |
//! | `score` | `marks` |
//! | `asset_address` | `image_url` |
//! | `asset_key` | `image_path` |
//! | `created_at` | `created_at` |

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::RosterError;

// =============================================================================
// Record Identifier
// =============================================================================

/// Backend-assigned record identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId(value)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RecordId)
    }
}

// =============================================================================
// Record
// =============================================================================

/// A roster record owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: RecordId,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "marks", deserialize_with = "deserialize_score")]
    pub score: f64,
    /// Public retrieval address of the associated image, if any.
    #[serde(rename = "image_url", default)]
    pub asset_address: Option<String>,
    /// Storage key of the associated image, when the row was written with it.
    #[serde(rename = "image_path", default, skip_serializing_if = "Option::is_none")]
    pub asset_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scores arrive as JSON numbers from numeric columns and as strings from
/// text columns; both are accepted.
fn deserialize_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawScore {
        Number(f64),
        Text(String),
    }

    match RawScore::deserialize(deserializer)? {
        RawScore::Number(n) => Ok(n),
        RawScore::Text(s) => parse_score(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a user-entered score.
///
/// Leading and trailing whitespace is ignored. Empty input, non-numeric text
/// and non-finite values are rejected.
pub fn parse_score(raw: &str) -> Result<f64, RosterError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RosterError::Validation("score is required".to_string()));
    }
    match trimmed.parse::<f64>() {
        Ok(score) if score.is_finite() => Ok(score),
        _ => Err(RosterError::Validation(format!(
            "score must be a number, got {trimmed:?}"
        ))),
    }
}

// =============================================================================
// Asset References
// =============================================================================

/// Where a record's image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub address: Option<String>,
    pub key: Option<String>,
}

impl AssetRef {
    /// Build from the two record columns. A row with neither has no asset.
    pub fn from_columns(address: Option<String>, key: Option<String>) -> Option<Self> {
        if address.is_none() && key.is_none() {
            return None;
        }
        Some(AssetRef { address, key })
    }
}

/// Stored asset produced by a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub key: String,
    pub address: String,
}

// =============================================================================
// Create Request
// =============================================================================

/// Fields supplied when creating a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub display_name: String,
    pub score: f64,
    pub asset: Option<StoredAsset>,
}

impl NewRecord {
    /// Row body for an insert. The owner is always supplied by the gateway.
    pub fn to_row(&self, owner_id: &str, include_asset_key: bool) -> Value {
        let mut row = json!({
            "name": self.display_name,
            "marks": self.score,
            "image_url": self.asset.as_ref().map(|a| a.address.clone()),
            "user_id": owner_id,
        });
        if include_asset_key {
            if let Some(asset) = &self.asset {
                row["image_path"] = Value::String(asset.key.clone());
            }
        }
        row
    }
}

// =============================================================================
// Upload Payload
// =============================================================================

/// A file selected for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct AssetUpload {
    /// Original file name; only its extension is kept in the storage key.
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for AssetUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl AssetUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            content_type: None,
        }
    }

    /// Read an upload from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }

    /// File extension of the original name, as written.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
    }

    /// Declared content type, or one guessed from the file name.
    pub fn resolved_content_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}
