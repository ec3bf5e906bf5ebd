// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM chain access.
//!
//! This module provides functionality for:
//! - A scoped RPC connection pool with liveness probing and fallback
//! - Generic contract invocation (signed writes, read-only views)
//! - Custodial credential -> signer conversion
//! - Token registry and decimal amount helpers

pub mod connector;
pub mod erc20;
pub mod gateway;
pub mod signing;
pub mod types;
pub mod units;

pub use connector::{ActiveConnection, ChainConnector, ConnectionPool, BALANCE_SENTINEL};
pub use gateway::{ContractGateway, GatewayError, TransactionHandle, TransactionOutcome};
pub use types::*;
