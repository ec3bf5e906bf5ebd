// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow settlement: contract bindings, the lifecycle state machine, and
//! the off-chain mirror that follows it.

pub mod contract;
pub mod ledger;
pub mod reconciler;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use contract::{EscrowChain, EscrowContracts};
pub use ledger::{EscrowLedger, EscrowSnapshot, LedgerError, SellerReputation};
pub use reconciler::Reconciler;
pub use types::{CreateEscrowRequest, EscrowStatus, TransactionMirror, Winner};
