// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PostgREST table access.

use reqwest::Method;
use serde_json::Value;

use super::{expect_success, transport, SupabaseClient};
use crate::auth::Session;
use crate::backend::{Filter, Query, TableBackend};
use crate::error::ProviderError;

const RETURN_REPRESENTATION: &str = "return=representation";

impl TableBackend for SupabaseClient {
    async fn select(
        &self,
        session: &Session,
        table: &str,
        query: &Query,
    ) -> Result<Vec<Value>, ProviderError> {
        let operation = format!("GET /rest/v1/{table}");
        let response = self
            .authorized(Method::GET, &table_path(table), session)
            .query(&select_params(query))
            .send()
            .await
            .map_err(|e| transport(&operation, e))?;

        expect_success(response, &operation)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{operation} invalid JSON: {e}")))
    }

    async fn insert(
        &self,
        session: &Session,
        table: &str,
        row: Value,
    ) -> Result<Value, ProviderError> {
        let operation = format!("POST /rest/v1/{table}");
        let response = self
            .authorized(Method::POST, &table_path(table), session)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&Value::Array(vec![row]))
            .send()
            .await
            .map_err(|e| transport(&operation, e))?;

        let rows: Vec<Value> = expect_success(response, &operation)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{operation} invalid JSON: {e}")))?;

        rows.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse(format!("{operation} returned no row"))
        })
    }

    async fn delete(
        &self,
        session: &Session,
        table: &str,
        filter: &Filter,
    ) -> Result<u64, ProviderError> {
        let operation = format!("DELETE /rest/v1/{table}");
        let response = self
            .authorized(Method::DELETE, &table_path(table), session)
            .header("Prefer", RETURN_REPRESENTATION)
            .query(&filter_params(filter))
            .send()
            .await
            .map_err(|e| transport(&operation, e))?;

        let deleted: Vec<Value> = expect_success(response, &operation)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{operation} invalid JSON: {e}")))?;
        Ok(deleted.len() as u64)
    }
}

fn table_path(table: &str) -> String {
    format!("/rest/v1/{table}")
}

fn select_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(filter_params(&query.filter));
    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{direction}", order.column)));
    }
    params
}

fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    filter
        .conditions
        .iter()
        .map(|(column, value)| (column.clone(), filter_operand(value)))
        .collect()
}

fn filter_operand(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) => format!("eq.{s}"),
        other => format!("eq.{other}"),
    }
}
