// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage bucket access.

use reqwest::Method;
use serde_json::json;

use super::{expect_success, transport, SupabaseClient};
use crate::auth::Session;
use crate::backend::ObjectBackend;
use crate::error::ProviderError;

impl ObjectBackend for SupabaseClient {
    async fn upload(
        &self,
        session: &Session,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let path = object_path(bucket, key);
        let operation = format!("POST {path}");
        let response = self
            .authorized(Method::POST, &path, session)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport(&operation, e))?;

        expect_success(response, &operation).await?;
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.endpoint(&format!("/storage/v1/object/public/{bucket}/{key}"))
    }

    async fn remove(
        &self,
        session: &Session,
        bucket: &str,
        keys: &[String],
    ) -> Result<(), ProviderError> {
        let path = format!("/storage/v1/object/{bucket}");
        let operation = format!("DELETE {path}");
        let response = self
            .authorized(Method::DELETE, &path, session)
            .json(&json!({ "prefixes": keys }))
            .send()
            .await
            .map_err(|e| transport(&operation, e))?;

        // Missing objects are not an error; the response just omits them.
        expect_success(response, &operation).await?;
        Ok(())
    }
}

fn object_path(bucket: &str, key: &str) -> String {
    format!("/storage/v1/object/{bucket}/{key}")
}
