// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Generic signed-write / read-only-view invocation against one contract.
//!
//! Every error carries the ABI method name. Writes are submitted once and
//! never retried here; views are safe for callers to retry.

use std::sync::Arc;
use std::time::Duration;

use alloy::{
    contract::{ContractInstance, Interface},
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    network::Ethereum,
    primitives::{Address, Log, B256, U256},
    providers::PendingTransactionBuilder,
};
use tracing::{debug, info, warn};

use super::connector::ChainConnector;
use super::types::ChainError;

/// How long [`TransactionHandle::wait`] waits for a receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors from contract invocation, tagged with the ABI method.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("{method}: no such function in ABI")]
    UnknownMethod { method: String },

    #[error("{method}: {source}")]
    Chain {
        method: String,
        #[source]
        source: ChainError,
    },

    #[error("{method}: connector has no signer")]
    MissingSigner { method: String },

    #[error("{method}: {source}")]
    Call {
        method: String,
        #[source]
        source: alloy::contract::Error,
    },

    #[error("{method}: timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("{method}: receipt for {tx_hash} unavailable: {reason}")]
    Receipt {
        method: String,
        tx_hash: B256,
        reason: String,
    },

    #[error("{method}: transaction {tx_hash} reverted")]
    Reverted { method: String, tx_hash: B256 },

    #[error("{method}: unexpected return data: {reason}")]
    Decode { method: String, reason: String },
}

impl GatewayError {
    /// ABI method the error belongs to.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::InvalidAbi(_) => None,
            Self::UnknownMethod { method }
            | Self::Chain { method, .. }
            | Self::MissingSigner { method }
            | Self::Call { method, .. }
            | Self::Timeout { method, .. }
            | Self::Receipt { method, .. }
            | Self::Reverted { method, .. }
            | Self::Decode { method, .. } => Some(method),
        }
    }

    pub fn decode(method: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a human-readable ABI (`function foo(uint256) view returns (bool)`).
pub fn parse_abi(signatures: &[&str]) -> Result<JsonAbi, GatewayError> {
    JsonAbi::parse(signatures.iter().copied()).map_err(|e| GatewayError::InvalidAbi(e.to_string()))
}

/// Mined transaction summary.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub logs: Vec<Log>,
}

/// A submitted, not yet mined, transaction.
pub struct TransactionHandle {
    method: String,
    tx_hash: B256,
    pending: PendingTransactionBuilder<Ethereum>,
    receipt_timeout: Duration,
}

impl TransactionHandle {
    pub fn tx_hash(&self) -> B256 {
        self.tx_hash
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the receipt. A reverted receipt is an error.
    pub async fn wait(self) -> Result<TransactionOutcome, GatewayError> {
        let Self {
            method,
            tx_hash,
            pending,
            receipt_timeout,
        } = self;

        let receipt = pending
            .with_timeout(Some(receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| GatewayError::Receipt {
                method: method.clone(),
                tx_hash,
                reason: e.to_string(),
            })?;

        if !receipt.status() {
            warn!(method = %method, tx_hash = %tx_hash, "Transaction reverted");
            return Err(GatewayError::Reverted { method, tx_hash });
        }

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| log.inner.clone())
            .collect();

        Ok(TransactionOutcome {
            tx_hash,
            block_number: receipt.block_number,
            logs,
        })
    }
}

/// Invokes one contract through a [`ChainConnector`].
#[derive(Clone)]
pub struct ContractGateway {
    name: &'static str,
    address: Address,
    interface: Interface,
    connector: Arc<ChainConnector>,
    receipt_timeout: Duration,
}

impl ContractGateway {
    pub fn new(
        name: &'static str,
        address: Address,
        abi: JsonAbi,
        connector: Arc<ChainConnector>,
    ) -> Self {
        Self {
            name,
            address,
            interface: Interface::new(abi),
            connector,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Same contract, routed through another connector (e.g. another signer).
    pub fn with_connector(&self, connector: Arc<ChainConnector>) -> Self {
        Self {
            connector,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn connector(&self) -> &Arc<ChainConnector> {
        &self.connector
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.interface.abi().function(method).is_some()
    }

    /// Submit a signed state-mutating call.
    pub async fn execute_transaction(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<TransactionHandle, GatewayError> {
        self.execute_payable(method, args, U256::ZERO).await
    }

    /// Submit a signed state-mutating call carrying `value` wei.
    pub async fn execute_payable(
        &self,
        method: &str,
        args: &[DynSolValue],
        value: U256,
    ) -> Result<TransactionHandle, GatewayError> {
        self.ensure_method(method)?;

        let active = self
            .connector
            .get_provider()
            .await
            .map_err(|source| GatewayError::Chain {
                method: method.to_string(),
                source,
            })?;
        let provider = active
            .write_provider()
            .ok_or_else(|| GatewayError::MissingSigner {
                method: method.to_string(),
            })?
            .clone();

        let instance =
            ContractInstance::<_, Ethereum>::new(self.address, provider, self.interface.clone());
        let call = instance
            .function(method, args)
            .map_err(|source| GatewayError::Call {
                method: method.to_string(),
                source,
            })?
            .value(value);

        let timeout = self.connector.timeout();
        let pending = tokio::time::timeout(timeout, call.send())
            .await
            .map_err(|_| GatewayError::Timeout {
                method: method.to_string(),
                timeout,
            })?
            .map_err(|source| GatewayError::Call {
                method: method.to_string(),
                source,
            })?;

        let tx_hash = *pending.tx_hash();
        info!(
            contract = self.name,
            method,
            tx_hash = %tx_hash,
            endpoint = %active.endpoint().name,
            signer = ?active.signer_address(),
            "Transaction submitted"
        );

        Ok(TransactionHandle {
            method: method.to_string(),
            tx_hash,
            pending,
            receipt_timeout: self.receipt_timeout,
        })
    }

    /// Read-only call.
    pub async fn execute_view(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, GatewayError> {
        self.ensure_method(method)?;

        let active = self
            .connector
            .get_provider()
            .await
            .map_err(|source| GatewayError::Chain {
                method: method.to_string(),
                source,
            })?;

        let instance = ContractInstance::<_, Ethereum>::new(
            self.address,
            active.provider().clone(),
            self.interface.clone(),
        );
        let call = instance
            .function(method, args)
            .map_err(|source| GatewayError::Call {
                method: method.to_string(),
                source,
            })?;

        let timeout = self.connector.timeout();
        let output = tokio::time::timeout(timeout, async { call.call().await })
            .await
            .map_err(|_| GatewayError::Timeout {
                method: method.to_string(),
                timeout,
            })?
            .map_err(|source| GatewayError::Call {
                method: method.to_string(),
                source,
            })?;

        debug!(contract = self.name, method, outputs = output.len(), "View call completed");
        Ok(output)
    }

    fn ensure_method(&self, method: &str) -> Result<(), GatewayError> {
        if self.has_method(method) {
            Ok(())
        } else {
            Err(GatewayError::UnknownMethod {
                method: method.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::connector::ConnectionPool;
    use crate::blockchain::types::EndpointConfig;

    const SAMPLE_ABI: &[&str] = &[
        "function ping(uint256 nonce) returns (bool)",
        "function peek(address who) view returns (uint256)",
    ];

    fn dead_gateway() -> ContractGateway {
        let pool = Arc::new(ConnectionPool::new());
        let endpoint = EndpointConfig::new("dead", "http://127.0.0.1:1", 31337);
        let connector =
            ChainConnector::new(pool, &endpoint, None, Duration::from_millis(300)).unwrap();
        ContractGateway::new(
            "sample",
            Address::repeat_byte(0x11),
            parse_abi(SAMPLE_ABI).unwrap(),
            Arc::new(connector),
        )
    }

    #[test]
    fn parse_abi_rejects_garbage() {
        assert!(matches!(
            parse_abi(&["functoin broken("]),
            Err(GatewayError::InvalidAbi(_))
        ));
    }

    #[tokio::test]
    async fn unknown_method_fails_before_network() {
        let gateway = dead_gateway();
        assert!(gateway.has_method("ping"));
        assert!(!gateway.has_method("pong"));

        let err = gateway.execute_view("pong", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownMethod { .. }));
        assert_eq!(err.method(), Some("pong"));
    }

    #[tokio::test]
    async fn chain_failure_is_tagged_with_method() {
        let gateway = dead_gateway();

        let err = gateway
            .execute_transaction("ping", &[DynSolValue::Uint(U256::from(1u64), 256)])
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            GatewayError::Chain {
                source: ChainError::ProviderUnavailable { .. },
                ..
            }
        ));
        assert_eq!(err.method(), Some("ping"));
        assert!(err.to_string().starts_with("ping:"));

        let err = gateway
            .execute_view("peek", &[DynSolValue::Address(Address::ZERO)])
            .await
            .unwrap_err();
        assert_eq!(err.method(), Some("peek"));
    }
}
