// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record store gateway.
//!
//! Owner-scoped create/read/delete of roster records. Every call takes the
//! live session and filters by its user ID; there is no way to pass an owner
//! ID separately.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::ownership::{verify_all, OwnershipEnforcer};
use crate::auth::Session;
use crate::backend::{Filter, Order, Query, TableBackend};
use crate::error::{RosterError, RosterResult};
use crate::models::{AssetRef, NewRecord, Record, RecordId};

const OWNER_COLUMN: &str = "user_id";
const ID_COLUMN: &str = "id";
const CREATED_AT_COLUMN: &str = "created_at";

/// Asset columns of a record row.
#[derive(Debug, Deserialize)]
struct AssetColumns {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_path: Option<String>,
}

/// Gateway to the remote record table.
pub struct RecordGateway<T> {
    backend: Arc<T>,
    table: String,
    store_asset_keys: bool,
}

impl<T> Clone for RecordGateway<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            table: self.table.clone(),
            store_asset_keys: self.store_asset_keys,
        }
    }
}

impl<T: TableBackend> RecordGateway<T> {
    pub fn new(backend: Arc<T>, table: impl Into<String>, store_asset_keys: bool) -> Self {
        Self {
            backend,
            table: table.into(),
            store_asset_keys,
        }
    }

    fn owner_filter(session: &Session) -> Filter {
        Filter::new().eq(OWNER_COLUMN, session.user_id.as_str())
    }

    /// List the session owner's records, newest first.
    pub async fn list_records(&self, session: &Session) -> RosterResult<Vec<Record>> {
        let query = Query {
            filter: Self::owner_filter(session),
            order: Some(Order::desc(CREATED_AT_COLUMN)),
        };

        let rows = self
            .backend
            .select(session, &self.table, &query)
            .await
            .map_err(|e| RosterError::Backend(e.to_string()))?;

        let mut records = rows
            .into_iter()
            .map(decode_record)
            .collect::<RosterResult<Vec<_>>>()?;
        verify_all(&records, session)?;

        // Stable sort keeps the backend's tie order for equal timestamps.
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!(user_id = %session.user_id, count = records.len(), "Listed records");
        Ok(records)
    }

    /// Insert a record owned by the session's user.
    pub async fn insert_record(&self, session: &Session, fields: &NewRecord) -> RosterResult<Record> {
        if !fields.score.is_finite() {
            return Err(RosterError::Validation(
                "score must be a finite number".to_string(),
            ));
        }

        let row = fields.to_row(&session.user_id, self.store_asset_keys);
        let stored = self
            .backend
            .insert(session, &self.table, row)
            .await
            .map_err(|e| RosterError::Backend(e.to_string()))?;

        let record = decode_record(stored)?;
        record.verify_ownership(session)?;
        Ok(record)
    }

    /// Look up the asset of one of the owner's records.
    ///
    /// # Errors
    /// `RosterError::NotFound` when no row matches both the ID and the owner.
    pub async fn get_record_asset(
        &self,
        session: &Session,
        id: RecordId,
    ) -> RosterResult<Option<AssetRef>> {
        let query = Query {
            filter: Filter::new()
                .eq(ID_COLUMN, id.0)
                .eq(OWNER_COLUMN, session.user_id.as_str()),
            order: None,
        };

        let rows = self
            .backend
            .select(session, &self.table, &query)
            .await
            .map_err(|e| RosterError::Backend(e.to_string()))?;

        let Some(row) = rows.into_iter().next() else {
            return Err(RosterError::NotFound(id));
        };

        let columns: AssetColumns = serde_json::from_value(row)
            .map_err(|e| RosterError::Backend(format!("invalid record row: {e}")))?;
        Ok(AssetRef::from_columns(columns.image_url, columns.image_path))
    }

    /// Delete one of the owner's records. Deleting a missing record is a no-op.
    pub async fn delete_record(&self, session: &Session, id: RecordId) -> RosterResult<()> {
        let filter = Filter::new()
            .eq(ID_COLUMN, id.0)
            .eq(OWNER_COLUMN, session.user_id.as_str());

        let deleted = self
            .backend
            .delete(session, &self.table, &filter)
            .await
            .map_err(|e| RosterError::Backend(e.to_string()))?;

        debug!(user_id = %session.user_id, record_id = %id, deleted, "Deleted record");
        Ok(())
    }
}

fn decode_record(row: Value) -> RosterResult<Record> {
    serde_json::from_value(row).map_err(|e| RosterError::Backend(format!("invalid record row: {e}")))
}
