// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Escrow Engine - Risk-Adaptive Payment Routing & Escrow Settlement
//!
//! Decides how funds move between a buyer and a vendor (direct, escrow, or
//! blocked), keeps an off-chain mirror of the on-chain escrow contract, and
//! guards custodial signing keys with two-factor envelope encryption.
//!
//! ## Modules
//!
//! - `vault` - Custodial key envelopes (master key + password hash)
//! - `blockchain` - RPC connection pool, contract gateway, token registry
//! - `escrow` - Escrow lifecycle, mirror reconciliation
//! - `risk` - Risk signal aggregation over pluggable providers
//! - `routing` - Payment method decision and vendor verification
//! - `storage` - Transaction mirror persistence (redb)

pub mod blockchain;
pub mod config;
pub mod escrow;
pub mod logging;
pub mod risk;
pub mod routing;
pub mod state;
pub mod storage;
pub mod vault;
