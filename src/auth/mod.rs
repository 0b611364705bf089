// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Session state for the roster client.
//!
//! ## Session Flow
//!
//! 1. At startup the monitor asks the backend for a persisted session
//! 2. Sign-in, sign-up confirmation and token refresh replace the session
//! 3. Sign-out (or a rejected refresh token) clears it
//! 4. Every transition is published to subscribers; the coordinator is the
//!    one mandatory subscriber
//!
//! ## Security
//!
//! - Tokens never appear in `Debug` output or logs
//! - Access token claims are decoded, not verified; the backend verifies them
//! - The user ID from the session is the only owner ID the gateways accept

pub mod error;
pub mod monitor;
pub mod persist;
pub mod refresher;
pub mod session;

pub use error::AuthError;
pub use monitor::{SessionEvent, SessionEventKind, SessionMonitor, SessionSubscription};
pub use persist::{PersistedSession, SessionFile};
pub use refresher::SessionRefresher;
pub use session::{AccessClaims, Session};
