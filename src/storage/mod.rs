// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent storage for the off-chain escrow mirror. The mirror is never
//! authoritative: the escrow ledger reconciles it against the chain on read.

pub mod mirror_db;

pub use mirror_db::{MirrorDatabase, MirrorDbError, MirrorDbResult};
