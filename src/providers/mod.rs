// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote backend providers.

pub mod supabase;

pub use supabase::SupabaseClient;
