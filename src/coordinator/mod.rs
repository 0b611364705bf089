// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Resource Lifecycle Coordinator
//!
//! Keeps the local record set consistent with the backend across session
//! transitions and multi-step operations.
//!
//! ## Sessions and Epochs
//!
//! Every identity change (sign-out, or sign-in as a different user) advances
//! the epoch. Each operation captures an [`OpTicket`] when it starts and
//! checks it before every remote step and before applying its result; an
//! operation that outlived its session returns `RosterError::SessionChanged`
//! and leaves the state alone. A token refresh for the same user reloads
//! without advancing the epoch.
//!
//! ## Ordering
//!
//! - Create: upload image, insert row, re-list
//! - Delete: look up asset, remove image, delete row, drop locally
//!
//! Steps within one operation are sequential. Operations are not serialized
//! against each other; the last state write wins.

mod state;

pub use state::{OpTicket, RecordDraft, RosterSnapshot, RosterState};

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::state::{Inner, Phase};
use crate::auth::{Session, SessionMonitor};
use crate::backend::RemoteBackend;
use crate::config::CollectionConfig;
use crate::error::{RosterError, RosterResult};
use crate::gateway::{storage_key_from_address, BlobGateway, RecordGateway};
use crate::models::{parse_score, AssetUpload, NewRecord, Record, RecordId, StoredAsset};

/// Owns the local record set for the current session.
pub struct RosterCoordinator<B> {
    monitor: Arc<SessionMonitor<B>>,
    records: RecordGateway<B>,
    blobs: BlobGateway<B>,
    inner: RwLock<Inner>,
    snapshot: watch::Sender<RosterSnapshot>,
}

impl<B: RemoteBackend> RosterCoordinator<B> {
    pub fn new(monitor: Arc<SessionMonitor<B>>, collections: &CollectionConfig) -> Self {
        let backend = Arc::clone(monitor.backend());
        let (snapshot, _) = watch::channel(RosterSnapshot::default());
        Self {
            records: RecordGateway::new(
                Arc::clone(&backend),
                collections.records_table.clone(),
                collections.store_asset_keys,
            ),
            blobs: BlobGateway::new(backend, collections.asset_bucket.clone()),
            monitor,
            inner: RwLock::new(Inner::default()),
            snapshot,
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn state(&self) -> RosterState {
        self.snapshot.borrow().state.clone()
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch every published state change.
    pub fn subscribe(&self) -> watch::Receiver<RosterSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.snapshot());
    }

    // =========================================================================
    // Session Transitions
    // =========================================================================

    /// Fold session events into the roster until `shutdown` is cancelled.
    ///
    /// Events are applied in order on this task; the listing each one
    /// triggers runs on its own task so a slow reload never holds back a
    /// later sign-out.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.monitor.subscribe();
        info!("Roster coordinator starting");

        let initial = self.monitor.current_session();
        if let Some(ticket) = self.apply_session(initial).await {
            self.spawn_reload(ticket);
        }

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        info!("Session monitor closed, coordinator stopping");
                        return;
                    };
                    debug!(kind = ?event.kind, "Session event");
                    if let Some(ticket) = self.apply_session(event.session).await {
                        self.spawn_reload(ticket);
                    }
                }
                _ = shutdown.cancelled() => {
                    events.cancel();
                    info!("Roster coordinator shutting down");
                    return;
                }
            }
        }
    }

    fn spawn_reload(self: &Arc<Self>, ticket: OpTicket) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // Failures are already logged and reflected in the state.
            let _ = this.reload(ticket).await;
        });
    }

    /// Apply a session transition and reload if a session is present.
    pub async fn on_session_change(&self, session: Option<Session>) -> RosterResult<()> {
        match self.apply_session(session).await {
            Some(ticket) => self.reload(ticket).await,
            None => Ok(()),
        }
    }

    /// Apply a session transition to the local state without touching the
    /// network. Returns the ticket for the reload the transition requires.
    pub async fn apply_session(&self, session: Option<Session>) -> Option<OpTicket> {
        let mut inner = self.inner.write().await;

        let Some(session) = session else {
            if inner.session.is_none() && inner.phase == Phase::Unauthenticated {
                return None;
            }
            let previous = inner.session.take();
            inner.reset_identity();
            inner.phase = Phase::Unauthenticated;
            self.publish(&inner);
            info!(
                user_id = previous.as_ref().map(|s| s.user_id.as_str()).unwrap_or(""),
                epoch = inner.epoch,
                "Session ended, roster cleared"
            );
            return None;
        };

        let same_owner = inner
            .session
            .as_ref()
            .is_some_and(|current| current.user_id == session.user_id);
        if !same_owner {
            inner.reset_identity();
            info!(user_id = %session.user_id, epoch = inner.epoch, "Session started");
        }

        inner.session = Some(session.clone());
        inner.phase = Phase::Loading;
        self.publish(&inner);

        Some(OpTicket {
            epoch: inner.epoch,
            session,
        })
    }

    /// Re-list the owner's records under `ticket`.
    pub async fn reload(&self, ticket: OpTicket) -> RosterResult<()> {
        let result = self.records.list_records(&ticket.session).await;

        let mut inner = self.inner.write().await;
        if inner.epoch != ticket.epoch {
            debug!(
                epoch = ticket.epoch,
                current = inner.epoch,
                "Discarding stale record listing"
            );
            return Err(RosterError::SessionChanged);
        }

        match result {
            Ok(records) => {
                info!(user_id = %ticket.session.user_id, count = records.len(), "Roster loaded");
                inner.records = records;
                inner.phase = Phase::Ready;
                self.publish(&inner);
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %ticket.session.user_id, error = %e, "Roster load failed");
                inner.phase = Phase::Error(e.to_string());
                self.publish(&inner);
                Err(e)
            }
        }
    }

    /// Re-list on demand.
    pub async fn refresh(&self) -> RosterResult<()> {
        let ticket = self.begin().await?;
        {
            let mut inner = self.inner.write().await;
            if inner.epoch != ticket.epoch {
                return Err(RosterError::SessionChanged);
            }
            inner.phase = Phase::Loading;
            self.publish(&inner);
        }
        self.reload(ticket).await
    }

    /// Sign out and clear local state whatever the backend says.
    pub async fn logout(&self) -> RosterResult<()> {
        let result = self.monitor.sign_out().await;
        self.apply_session(None).await;
        result.map_err(RosterError::from)
    }

    // =========================================================================
    // Draft
    // =========================================================================

    pub async fn draft(&self) -> RecordDraft {
        self.inner.read().await.draft.clone()
    }

    pub async fn update_draft(&self, draft: RecordDraft) {
        self.inner.write().await.draft = draft;
    }

    /// Submit the held draft. It is cleared only once the record is listed.
    pub async fn submit_draft(&self) -> RosterResult<Record> {
        let draft = self.draft().await;
        self.add_record(&draft.display_name, &draft.raw_score, draft.asset)
            .await
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a record, uploading its image first when one is given.
    pub async fn add_record(
        &self,
        display_name: &str,
        raw_score: &str,
        asset: Option<AssetUpload>,
    ) -> RosterResult<Record> {
        let score = match parse_score(raw_score) {
            Ok(score) => score,
            Err(e) => return Err(self.annotate_validation(e).await),
        };

        let ticket = self.begin().await?;
        match self.add_with(&ticket, display_name, score, asset).await {
            Ok(record) => Ok(record),
            Err(e) => Err(self.annotate(&ticket, e).await),
        }
    }

    async fn add_with(
        &self,
        ticket: &OpTicket,
        display_name: &str,
        score: f64,
        asset: Option<AssetUpload>,
    ) -> RosterResult<Record> {
        let session = &ticket.session;

        let stored = match asset {
            Some(file) => {
                let key = self.blobs.upload(session, file).await?;
                if let Err(e) = self.ensure_current(ticket).await {
                    warn!(user_id = %session.user_id, key = %key, "Session changed after upload, image orphaned");
                    return Err(e);
                }
                let address = self.blobs.public_address(&key);
                Some(StoredAsset { key, address })
            }
            None => None,
        };
        let orphan_key = stored.as_ref().map(|a| a.key.clone());

        let fields = NewRecord {
            display_name: display_name.to_string(),
            score,
            asset: stored,
        };
        let created = match self.records.insert_record(session, &fields).await {
            Ok(record) => record,
            Err(e) => {
                if let Some(key) = orphan_key {
                    warn!(user_id = %session.user_id, key = %key, "Insert failed, image orphaned");
                }
                return Err(e);
            }
        };

        self.ensure_current(ticket).await?;
        let records = self.records.list_records(session).await?;

        let mut inner = self.inner.write().await;
        if inner.epoch != ticket.epoch {
            return Err(RosterError::SessionChanged);
        }
        inner.records = records;
        inner.phase = Phase::Ready;
        inner.draft = RecordDraft::default();
        self.publish(&inner);

        info!(user_id = %session.user_id, record_id = %created.id, "Record created");
        Ok(created)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a record and its image. Deleting a missing record succeeds.
    pub async fn delete_record(&self, id: RecordId) -> RosterResult<()> {
        let ticket = self.begin().await?;
        match self.delete_with(&ticket, id).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.annotate(&ticket, e).await),
        }
    }

    async fn delete_with(&self, ticket: &OpTicket, id: RecordId) -> RosterResult<()> {
        let session = &ticket.session;

        let asset = match self.records.get_record_asset(session, id).await {
            Ok(asset) => asset,
            Err(RosterError::NotFound(_)) => {
                debug!(user_id = %session.user_id, record_id = %id, "Record already gone");
                return self.drop_local(ticket, id).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(asset) = asset {
            let key = asset
                .key
                .or_else(|| asset.address.as_deref().and_then(storage_key_from_address))
                .ok_or_else(|| {
                    RosterError::Storage(format!("cannot resolve the image key of record {id}"))
                })?;

            self.ensure_current(ticket).await?;
            self.blobs.remove(session, &key).await?;
        }

        self.ensure_current(ticket).await?;
        self.records.delete_record(session, id).await?;

        info!(user_id = %session.user_id, record_id = %id, "Record deleted");
        self.drop_local(ticket, id).await
    }

    async fn drop_local(&self, ticket: &OpTicket, id: RecordId) -> RosterResult<()> {
        let mut inner = self.inner.write().await;
        if inner.epoch != ticket.epoch {
            return Err(RosterError::SessionChanged);
        }
        inner.records.retain(|record| record.id != id);
        inner.phase = Phase::Ready;
        self.publish(&inner);
        Ok(())
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    async fn begin(&self) -> RosterResult<OpTicket> {
        let inner = self.inner.read().await;
        let session = inner.session.clone().ok_or(RosterError::Unauthenticated)?;
        Ok(OpTicket {
            epoch: inner.epoch,
            session,
        })
    }

    async fn ensure_current(&self, ticket: &OpTicket) -> RosterResult<()> {
        if self.inner.read().await.epoch == ticket.epoch {
            Ok(())
        } else {
            Err(RosterError::SessionChanged)
        }
    }

    /// Record a failed operation in the state, unless its session is gone.
    async fn annotate(&self, ticket: &OpTicket, error: RosterError) -> RosterError {
        if !error.is_user_visible() {
            debug!(epoch = ticket.epoch, "Operation outlived its session");
            return error;
        }

        warn!(user_id = %ticket.session.user_id, error = %error, "Roster operation failed");
        let mut inner = self.inner.write().await;
        if inner.epoch == ticket.epoch {
            inner.phase = Phase::Error(error.to_string());
            self.publish(&inner);
        }
        error
    }

    async fn annotate_validation(&self, error: RosterError) -> RosterError {
        let mut inner = self.inner.write().await;
        if inner.session.is_some() {
            inner.phase = Phase::Error(error.to_string());
            self.publish(&inner);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BackendCall, MemoryBackend};
    use serde_json::json;
    use std::time::Duration;

    const TABLE: &str = "students";
    const BUCKET: &str = "student-image";

    struct Harness {
        backend: Arc<MemoryBackend>,
        monitor: Arc<SessionMonitor<MemoryBackend>>,
        roster: Arc<RosterCoordinator<MemoryBackend>>,
    }

    async fn harness() -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        backend.register_user("u1", "ann@example.com", "hunter2");
        backend.register_user("u2", "eve@example.com", "swordfish");
        let monitor = Arc::new(SessionMonitor::start(Arc::clone(&backend)).await);
        let roster = Arc::new(RosterCoordinator::new(
            Arc::clone(&monitor),
            &CollectionConfig::default(),
        ));
        Harness {
            backend,
            monitor,
            roster,
        }
    }

    async fn signed_in_as(email: &str, password: &str) -> Harness {
        let h = harness().await;
        h.sign_in(email, password).await;
        h
    }

    impl Harness {
        async fn sign_in(&self, email: &str, password: &str) -> Session {
            let session = self.monitor.sign_in(email, password).await.unwrap();
            self.roster
                .on_session_change(Some(session.clone()))
                .await
                .unwrap();
            session
        }

        fn names(&self) -> Vec<String> {
            self.roster
                .state()
                .records()
                .iter()
                .map(|r| r.display_name.clone())
                .collect()
        }

        fn position(&self, wanted: impl Fn(&BackendCall) -> bool) -> usize {
            self.backend
                .calls()
                .iter()
                .position(wanted)
                .expect("call should have been made")
        }
    }

    #[tokio::test]
    async fn add_without_image_lists_new_record() {
        let h = signed_in_as("ann@example.com", "hunter2").await;

        let created = h.roster.add_record("Bob", "87", None).await.unwrap();

        let state = h.roster.state();
        assert!(state.is_ready());
        assert_eq!(state.records().len(), 1);
        let record = &state.records()[0];
        assert_eq!(record.id, created.id);
        assert_eq!(record.display_name, "Bob");
        assert_eq!(record.score, 87.0);
        assert_eq!(record.owner_id, "u1");
        assert_eq!(record.asset_address, None);
    }

    #[tokio::test]
    async fn add_with_image_uploads_before_insert() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.backend.clear_calls();

        let file = AssetUpload::new("portrait.png", vec![0x89, 0x50, 0x4e, 0x47]);
        let created = h.roster.add_record("Ann", "91.5", Some(file)).await.unwrap();

        let upload = h.position(|c| matches!(c, BackendCall::Upload { .. }));
        let insert = h.position(|c| matches!(c, BackendCall::Insert { .. }));
        assert!(upload < insert);

        let key = created.asset_key.clone().unwrap();
        assert!(key.starts_with("u1/") && key.ends_with(".png"));
        assert_eq!(
            created.asset_address.as_deref(),
            Some(format!("https://memory.invalid/storage/v1/object/public/{BUCKET}/{key}").as_str())
        );
        assert!(h.backend.object(BUCKET, &key).is_some());
    }

    #[tokio::test]
    async fn invalid_score_makes_no_backend_calls() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.backend.clear_calls();

        let result = h
            .roster
            .add_record("Bob", "abc", Some(AssetUpload::new("a.png", vec![1])))
            .await;

        assert!(matches!(result, Err(RosterError::Validation(_))));
        assert!(h.backend.calls().is_empty());
        assert!(h.roster.state().error_message().is_some());
    }

    #[tokio::test]
    async fn add_requires_a_session() {
        let h = harness().await;
        let result = h.roster.add_record("Bob", "87", None).await;

        assert!(matches!(result, Err(RosterError::Unauthenticated)));
        assert_eq!(h.roster.state(), RosterState::Unauthenticated);
    }

    #[tokio::test]
    async fn failed_upload_creates_no_record() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.backend.fail_next_upload("permission denied");

        let result = h
            .roster
            .add_record("Bob", "87", Some(AssetUpload::new("a.png", vec![1])))
            .await;

        assert!(matches!(result, Err(RosterError::Storage(_))));
        assert!(!h
            .backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::Insert { .. })));
        assert!(h.backend.rows(TABLE).is_empty());
    }

    #[tokio::test]
    async fn failed_listing_after_insert_keeps_stale_records() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.roster.add_record("Ann", "70", None).await.unwrap();
        h.backend.fail_next_select("timeout");

        let result = h.roster.add_record("Bob", "87", None).await;

        assert!(matches!(result, Err(RosterError::Backend(_))));
        assert_eq!(h.backend.rows(TABLE).len(), 2);
        let state = h.roster.state();
        assert_eq!(state.records().len(), 1);
        assert!(state.error_message().is_some_and(|m| m.contains("timeout")));
    }

    #[tokio::test]
    async fn delete_removes_image_before_row() {
        let h = harness().await;
        h.backend.seed_row(
            TABLE,
            json!({
                "id": 5,
                "user_id": "u1",
                "name": "Bob",
                "marks": 87,
                "image_url": "https://cdn.example.com/storage/v1/object/public/student-image/u1/abc.png",
                "created_at": "2026-03-01T09:00:00Z"
            }),
        );
        h.sign_in("ann@example.com", "hunter2").await;
        assert_eq!(h.names(), vec!["Bob"]);
        h.backend.clear_calls();

        h.roster.delete_record(RecordId(5)).await.unwrap();

        let remove = h.position(|c| {
            *c == BackendCall::Remove {
                bucket: BUCKET.to_string(),
                keys: vec!["u1/abc.png".to_string()],
            }
        });
        let delete = h.position(|c| {
            *c == BackendCall::Delete {
                table: TABLE.to_string(),
                filter: crate::backend::Filter::new().eq("id", 5).eq("user_id", "u1"),
            }
        });
        assert!(remove < delete);
        assert!(h.roster.state().records().is_empty());
        assert!(h.backend.rows(TABLE).is_empty());
    }

    #[tokio::test]
    async fn delete_prefers_stored_key() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let created = h
            .roster
            .add_record("Ann", "70", Some(AssetUpload::new("a.jpg", vec![1])))
            .await
            .unwrap();
        let key = created.asset_key.clone().unwrap();

        h.roster.delete_record(created.id).await.unwrap();

        assert!(h.backend.object(BUCKET, &key).is_none());
        assert!(h.backend.rows(TABLE).is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let created = h.roster.add_record("Bob", "87", None).await.unwrap();

        h.roster.delete_record(created.id).await.unwrap();
        h.roster.delete_record(created.id).await.unwrap();

        let state = h.roster.state();
        assert!(state.is_ready());
        assert!(state.records().is_empty());
    }

    #[tokio::test]
    async fn failed_image_removal_keeps_row() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let created = h
            .roster
            .add_record("Bob", "87", Some(AssetUpload::new("b.png", vec![1])))
            .await
            .unwrap();
        h.backend.fail_next_remove("forbidden");

        let result = h.roster.delete_record(created.id).await;

        assert!(matches!(result, Err(RosterError::Storage(_))));
        assert_eq!(h.backend.rows(TABLE).len(), 1);
        let state = h.roster.state();
        assert_eq!(state.records().len(), 1);
        assert!(state.error_message().is_some());
    }

    #[tokio::test]
    async fn failed_insert_after_upload_leaves_image_orphaned() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.roster.add_record("Ann", "90", None).await.unwrap();
        let draft = RecordDraft {
            display_name: "Bob".into(),
            raw_score: "87".into(),
            asset: Some(AssetUpload::new("bob.png", vec![7])),
        };
        h.roster.update_draft(draft.clone()).await;
        h.backend.fail_next_insert("duplicate key value");

        let result = h.roster.submit_draft().await;

        assert!(matches!(result, Err(RosterError::Backend(_))));
        let keys = h.backend.object_keys(BUCKET);
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("u1/"));
        assert_eq!(h.backend.rows(TABLE).len(), 1);
        assert_eq!(h.names(), vec!["Ann"]);
        assert!(h.roster.state().error_message().is_some());
        assert_eq!(h.roster.draft().await, draft);
    }

    #[tokio::test]
    async fn failed_row_delete_after_image_removal_keeps_record() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let created = h
            .roster
            .add_record("Bob", "87", Some(AssetUpload::new("b.png", vec![1])))
            .await
            .unwrap();
        h.backend.fail_next_delete("statement timeout");

        let result = h.roster.delete_record(created.id).await;

        assert!(matches!(result, Err(RosterError::Backend(_))));
        assert!(h.backend.object_keys(BUCKET).is_empty());
        assert_eq!(h.backend.rows(TABLE).len(), 1);
        let state = h.roster.state();
        assert_eq!(state.records().len(), 1);
        assert_eq!(state.records()[0].id, created.id);
        assert!(state.error_message().is_some());
    }

    #[tokio::test]
    async fn records_are_isolated_per_owner() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let anns = h.roster.add_record("Ann's", "70", None).await.unwrap();

        h.roster.logout().await.unwrap();
        h.sign_in("eve@example.com", "swordfish").await;
        assert!(h.roster.state().records().is_empty());
        assert_eq!(h.roster.snapshot().owner_id.as_deref(), Some("u2"));

        // Eve cannot delete Ann's record; it is simply not found for her.
        h.roster.delete_record(anns.id).await.unwrap();
        assert_eq!(h.backend.rows(TABLE).len(), 1);
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        for (name, score) in [("A", "1"), ("B", "2"), ("C", "3")] {
            h.roster.add_record(name, score, None).await.unwrap();
        }

        assert_eq!(h.names(), vec!["C", "B", "A"]);
        let records = h.roster.state().records().to_vec();
        assert!(records.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_records() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.roster.add_record("Bob", "87", None).await.unwrap();
        h.backend.fail_next_select("connection refused");

        let result = h.roster.refresh().await;

        assert!(matches!(result, Err(RosterError::Backend(_))));
        match h.roster.state() {
            RosterState::Error { records, message } => {
                assert_eq!(records.len(), 1);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected error state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sign_out_mid_insert_discards_result() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let gate = h.backend.hold_inserts();

        let task = {
            let roster = Arc::clone(&h.roster);
            tokio::spawn(async move { roster.add_record("Bob", "87", None).await })
        };

        gate.started().await;
        h.roster.on_session_change(None).await.unwrap();
        gate.release();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(RosterError::SessionChanged)));
        assert_eq!(h.roster.state(), RosterState::Unauthenticated);
        assert!(h.roster.state().records().is_empty());
    }

    #[tokio::test]
    async fn stale_reload_after_owner_change_is_discarded() {
        let h = harness().await;
        h.backend.seed_row(
            TABLE,
            json!({
                "id": 1, "user_id": "u1", "name": "Ann's", "marks": 1,
                "image_url": null, "created_at": "2026-03-01T09:00:00Z"
            }),
        );
        let ann = h.backend.issue_session("u1").unwrap();
        let eve = h.backend.issue_session("u2").unwrap();

        let stale = h.roster.apply_session(Some(ann)).await.unwrap();
        let current = h.roster.apply_session(Some(eve)).await.unwrap();
        assert!(current.epoch() > stale.epoch());

        assert!(matches!(
            h.roster.reload(stale).await,
            Err(RosterError::SessionChanged)
        ));
        assert!(matches!(h.roster.state(), RosterState::Loading { ref records } if records.is_empty()));

        h.roster.reload(current).await.unwrap();
        assert!(h.roster.state().is_ready());
        assert!(h.roster.state().records().is_empty());
    }

    #[tokio::test]
    async fn token_refresh_reloads_without_clearing() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.roster.add_record("Bob", "87", None).await.unwrap();
        h.roster
            .update_draft(RecordDraft {
                display_name: "Half typed".into(),
                ..RecordDraft::default()
            })
            .await;

        let refreshed = h.monitor.refresh().await.unwrap();
        let ticket = h.roster.apply_session(Some(refreshed)).await.unwrap();

        assert!(matches!(h.roster.state(), RosterState::Loading { ref records } if records.len() == 1));
        assert_eq!(h.roster.draft().await.display_name, "Half typed");
        h.roster.reload(ticket).await.unwrap();
        assert_eq!(h.names(), vec!["Bob"]);
    }

    #[tokio::test]
    async fn draft_is_cleared_after_submit_and_on_sign_out() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let draft = RecordDraft {
            display_name: "Bob".into(),
            raw_score: "87".into(),
            asset: None,
        };

        h.roster.update_draft(draft.clone()).await;
        h.roster.submit_draft().await.unwrap();
        assert!(h.roster.draft().await.is_empty());
        assert_eq!(h.names(), vec!["Bob"]);

        h.roster.update_draft(draft).await;
        h.roster.logout().await.unwrap();
        assert!(h.roster.draft().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_draft_is_kept() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        let draft = RecordDraft {
            display_name: "Bob".into(),
            raw_score: "eighty".into(),
            asset: None,
        };

        h.roster.update_draft(draft.clone()).await;
        assert!(h.roster.submit_draft().await.is_err());
        assert_eq!(h.roster.draft().await, draft);
    }

    #[tokio::test]
    async fn logout_clears_state_when_remote_sign_out_fails() {
        let h = signed_in_as("ann@example.com", "hunter2").await;
        h.roster.add_record("Bob", "87", None).await.unwrap();
        h.backend.fail_sign_out(true);

        let result = h.roster.logout().await;

        assert!(matches!(result, Err(RosterError::Auth(_))));
        assert_eq!(h.roster.state(), RosterState::Unauthenticated);
        assert_eq!(h.monitor.current_session(), None);
    }

    #[tokio::test]
    async fn run_loop_follows_the_monitor() {
        let h = harness().await;
        h.backend.seed_row(
            TABLE,
            json!({
                "id": 1, "user_id": "u1", "name": "Bob", "marks": 87,
                "image_url": null, "created_at": "2026-03-01T09:00:00Z"
            }),
        );

        let shutdown = CancellationToken::new();
        let mut watch = h.roster.subscribe();
        let task = tokio::spawn(Arc::clone(&h.roster).run(shutdown.clone()));

        h.monitor.sign_in("ann@example.com", "hunter2").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            watch.wait_for(|s| s.state.is_ready() && s.owner_id.as_deref() == Some("u1")),
        )
        .await
        .expect("roster should load after sign-in")
        .unwrap();
        assert_eq!(h.names(), vec!["Bob"]);

        h.monitor.sign_out().await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            watch.wait_for(|s| s.state == RosterState::Unauthenticated),
        )
        .await
        .expect("roster should clear after sign-out")
        .unwrap();

        shutdown.cancel();
        task.await.unwrap();
    }
}
