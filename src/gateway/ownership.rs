// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement for everything the gateways return.
//!
//! The backend is asked for owner-scoped rows only; anything that comes back
//! owned by someone else is a contract violation and is never shown.

use crate::auth::Session;
use crate::error::{RosterError, RosterResult};
use crate::models::Record;

/// Trait for resources that have an owner.
pub trait OwnedResource {
    /// Get the owner's user ID.
    fn owner_id(&self) -> &str;

    /// Short description used in violation messages.
    fn describe(&self) -> String;
}

impl OwnedResource for Record {
    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn describe(&self) -> String {
        format!("record {}", self.id)
    }
}

/// Trait for enforcing ownership against the live session.
pub trait OwnershipEnforcer {
    /// Verify that the session's user owns this resource.
    ///
    /// # Errors
    /// Returns `RosterError::Backend` if the resource belongs to anyone else.
    fn verify_ownership(&self, session: &Session) -> RosterResult<()>;
}

impl<T: OwnedResource> OwnershipEnforcer for T {
    fn verify_ownership(&self, session: &Session) -> RosterResult<()> {
        if self.owner_id() == session.user_id {
            Ok(())
        } else {
            Err(RosterError::Backend(format!(
                "{} is not owned by the signed-in user",
                self.describe()
            )))
        }
    }
}

/// Verify a whole result set; one foreign row rejects all of it.
pub fn verify_all<T: OwnedResource>(items: &[T], session: &Session) -> RosterResult<()> {
    items.iter().try_for_each(|item| item.verify_ownership(session))
}
