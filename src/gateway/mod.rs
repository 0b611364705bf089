// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Gateways
//!
//! Typed, owner-scoped access to the two remote collections:
//!
//! - `records`: the roster table
//! - `blobs`: the image bucket
//!
//! Both take the live session on every call; the owner ID is always the
//! session's user ID.

pub mod blobs;
pub mod ownership;
pub mod records;

pub use blobs::{storage_key_from_address, BlobGateway};
pub use ownership::{OwnedResource, OwnershipEnforcer};
pub use records::RecordGateway;
