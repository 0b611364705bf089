// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Roster - Session-Scoped Roster Client
//!
//! This crate lets an authenticated user manage a personal roster of records,
//! each optionally carrying an uploaded image, against a Supabase project.
//! The local record set stays consistent with the backend across sign-in,
//! sign-out, token refresh and multi-step create/delete operations.
//!
//! ## Modules
//!
//! - `auth` - Session monitor, token refresh and session persistence
//! - `backend` - Backend traits (auth, tables, objects)
//! - `coordinator` - Resource lifecycle coordinator and observable state
//! - `gateway` - Owner-scoped record and blob gateways
//! - `memory` - In-memory backend
//! - `providers` - Supabase HTTP backend

pub mod auth;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod providers;
pub mod telemetry;
