// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ERC-20 token contract interactions.

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};

use super::connector::ChainConnector;
use super::gateway::{parse_abi, ContractGateway, GatewayError, TransactionOutcome};

/// Subset of the ERC-20 interface the engine calls.
pub const ERC20_ABI: &[&str] = &[
    "function decimals() view returns (uint8)",
    "function symbol() view returns (string)",
    "function balanceOf(address account) view returns (uint256)",
    "function allowance(address owner, address spender) view returns (uint256)",
    "function approve(address spender, uint256 amount) returns (bool)",
];

/// Gateway for the token at `token`.
pub fn erc20_gateway(
    token: Address,
    connector: Arc<ChainConnector>,
) -> Result<ContractGateway, GatewayError> {
    Ok(ContractGateway::new("erc20", token, parse_abi(ERC20_ABI)?, connector))
}

/// Current allowance granted by `owner` to `spender`.
pub async fn allowance(
    token: &ContractGateway,
    owner: Address,
    spender: Address,
) -> Result<U256, GatewayError> {
    let output = token
        .execute_view(
            "allowance",
            &[DynSolValue::Address(owner), DynSolValue::Address(spender)],
        )
        .await?;

    output
        .first()
        .and_then(|v| v.as_uint())
        .map(|(value, _)| value)
        .ok_or_else(|| GatewayError::decode("allowance", "expected uint256"))
}

/// Approve `spender` for `amount` unless the current allowance already covers it.
///
/// # Returns
/// * `Ok(None)` - Allowance was sufficient, nothing submitted
/// * `Ok(Some(outcome))` - An `approve` transaction was mined
pub async fn ensure_allowance(
    token: &ContractGateway,
    owner: Address,
    spender: Address,
    amount: U256,
) -> Result<Option<TransactionOutcome>, GatewayError> {
    let current = allowance(token, owner, spender).await?;
    if current >= amount {
        return Ok(None);
    }

    tracing::info!(
        token = %token.address(),
        spender = %spender,
        amount = %amount,
        "Approving token allowance"
    );

    let handle = token
        .execute_transaction(
            "approve",
            &[DynSolValue::Address(spender), DynSolValue::Uint(amount, 256)],
        )
        .await?;
    handle.wait().await.map(Some)
}
