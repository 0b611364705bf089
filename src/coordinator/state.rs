// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Observable roster state.

use crate::auth::Session;
use crate::models::{AssetUpload, Record};

/// What the presentation layer renders.
///
/// `Error` annotates the last known records; it never discards them.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterState {
    Unauthenticated,
    Loading { records: Vec<Record> },
    Ready { records: Vec<Record> },
    Error { records: Vec<Record>, message: String },
}

impl RosterState {
    /// Records currently shown, newest first.
    pub fn records(&self) -> &[Record] {
        match self {
            RosterState::Unauthenticated => &[],
            RosterState::Loading { records }
            | RosterState::Ready { records }
            | RosterState::Error { records, .. } => records,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RosterState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RosterState::Ready { .. })
    }

    /// Short name for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            RosterState::Unauthenticated => "unauthenticated",
            RosterState::Loading { .. } => "loading",
            RosterState::Ready { .. } => "ready",
            RosterState::Error { .. } => "error",
        }
    }
}

/// Value published on the coordinator's watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterSnapshot {
    pub state: RosterState,
    /// Owner of the records in `state`, if signed in
    pub owner_id: Option<String>,
}

impl Default for RosterSnapshot {
    fn default() -> Self {
        Self {
            state: RosterState::Unauthenticated,
            owner_id: None,
        }
    }
}

/// Unsubmitted create form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDraft {
    pub display_name: String,
    pub raw_score: String,
    pub asset: Option<AssetUpload>,
}

impl RecordDraft {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_empty() && self.raw_score.is_empty() && self.asset.is_none()
    }
}

/// Proof that an operation started under a given session epoch.
#[derive(Debug, Clone)]
pub struct OpTicket {
    pub(super) epoch: u64,
    pub(super) session: Session,
}

impl OpTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Phase {
    Unauthenticated,
    Loading,
    Ready,
    Error(String),
}

/// Mutable coordinator state. Lives behind one lock.
#[derive(Debug)]
pub(super) struct Inner {
    /// Advances whenever the identity changes
    pub epoch: u64,
    pub session: Option<Session>,
    pub records: Vec<Record>,
    pub phase: Phase,
    pub draft: RecordDraft,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            epoch: 0,
            session: None,
            records: Vec::new(),
            phase: Phase::Unauthenticated,
            draft: RecordDraft::default(),
        }
    }
}

impl Inner {
    pub fn snapshot(&self) -> RosterSnapshot {
        let records = self.records.clone();
        let state = match &self.phase {
            Phase::Unauthenticated => RosterState::Unauthenticated,
            Phase::Loading => RosterState::Loading { records },
            Phase::Ready => RosterState::Ready { records },
            Phase::Error(message) => RosterState::Error {
                records,
                message: message.clone(),
            },
        };
        RosterSnapshot {
            state,
            owner_id: self.session.as_ref().map(|s| s.user_id.clone()),
        }
    }

    /// Drop everything tied to the previous identity and start a new epoch.
    pub fn reset_identity(&mut self) {
        self.epoch += 1;
        self.records.clear();
        self.draft = RecordDraft::default();
    }
}
