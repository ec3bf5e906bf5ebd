// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Engine wiring: one connection pool, one vault, one mirror store, and the
//! ledger, aggregator and router built on top of them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::blockchain::signing::{signer_for, SigningError};
use crate::blockchain::{ChainConnector, ChainError, ConnectionPool, GatewayError};
use crate::config::{EngineConfig, RiskProviderConfig};
use crate::escrow::{EscrowContracts, EscrowLedger, Reconciler};
use crate::risk::{
    AssessmentCache, HttpSignalProvider, NullSignalProvider, RiskSignalAggregator, SignalProvider,
    SignalProviderError, ToolCallSignalProvider,
};
use crate::routing::{InMemoryVendorDirectory, PaymentRouter, VendorDirectory};
use crate::storage::{MirrorDatabase, MirrorDbError};
use crate::vault::{KeyVault, VaultError, WalletCredential};

pub const ASSESSMENT_CACHE_CAPACITY: usize = 1024;
pub const ASSESSMENT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Storage(#[from] MirrorDbError),

    #[error("risk provider setup failed: {0}")]
    SignalProvider(#[from] SignalProviderError),

    #[error("failed to prepare mirror database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handles for the running engine.
///
/// The default ledger and router sign with no key; per-user operations go
/// through [`EngineState::ledger_for`] / [`EngineState::router_for`].
#[derive(Clone)]
pub struct EngineState {
    pub pool: Arc<ConnectionPool>,
    pub connector: Arc<ChainConnector>,
    pub vault: Arc<KeyVault>,
    pub store: Arc<MirrorDatabase>,
    pub contracts: EscrowContracts,
    pub ledger: Arc<EscrowLedger>,
    pub aggregator: Arc<RiskSignalAggregator>,
    pub vendors: Arc<dyn VendorDirectory>,
    pub router: Arc<PaymentRouter>,
    pub risk_chain: String,
    reconcile_interval: Option<Duration>,
}

impl EngineState {
    /// Probe the configured RPC endpoints and wire every component.
    pub async fn build(config: &EngineConfig) -> Result<Self, StateError> {
        let pool = Arc::new(ConnectionPool::new());
        let connector = ChainConnector::create_with_fallback(
            Arc::clone(&pool),
            &config.endpoints,
            None,
            config.rpc_timeout,
        )
        .await?;
        Self::assemble(config, Arc::new(connector), Arc::new(InMemoryVendorDirectory::new()))
    }

    /// Wire every component around an existing connector.
    pub fn assemble(
        config: &EngineConfig,
        connector: Arc<ChainConnector>,
        vendors: Arc<dyn VendorDirectory>,
    ) -> Result<Self, StateError> {
        let vault = Arc::new(KeyVault::new(config.master_key.as_str())?);

        if let Some(parent) = config.mirror_db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Arc::new(MirrorDatabase::open(&config.mirror_db_path)?);

        let contracts = EscrowContracts::new(
            Arc::clone(&connector),
            config.escrow_address,
            config.dispute_address,
        )?;
        let ledger = Arc::new(EscrowLedger::new(
            Arc::new(contracts.clone()),
            Arc::clone(&store),
        ));

        let providers = risk_providers(&config.risk_provider, config.signal_timeout)?;
        let aggregator = Arc::new(
            RiskSignalAggregator::new(providers, config.signal_timeout).with_cache(
                AssessmentCache::new(ASSESSMENT_CACHE_CAPACITY, ASSESSMENT_CACHE_TTL),
            ),
        );

        let router = Arc::new(PaymentRouter::new(
            Arc::clone(&aggregator),
            Arc::clone(&ledger),
            Arc::clone(&vendors),
        ));

        info!(
            chain_id = connector.chain_id(),
            escrow = %config.escrow_address,
            dispute = %config.dispute_address,
            providers = ?aggregator.provider_names(),
            "Engine state assembled"
        );

        Ok(Self {
            pool: Arc::clone(connector.pool()),
            connector,
            vault,
            store,
            contracts,
            ledger,
            aggregator,
            vendors,
            router,
            risk_chain: config.risk_chain.clone(),
            reconcile_interval: config.reconcile_interval,
        })
    }

    /// Ledger whose writes are signed by the custodial wallet in `credential`.
    pub fn ledger_for(
        &self,
        credential: &WalletCredential,
        password_hash: &str,
    ) -> Result<EscrowLedger, StateError> {
        let signer = signer_for(&self.vault, credential, password_hash)?;
        let connector = Arc::new(self.connector.with_signer(signer)?);
        let contracts = self.contracts.with_connector(connector);
        Ok(self.ledger.with_chain(Arc::new(contracts)))
    }

    /// Router that creates escrows on behalf of `credential`'s wallet.
    pub fn router_for(
        &self,
        credential: &WalletCredential,
        password_hash: &str,
    ) -> Result<PaymentRouter, StateError> {
        let ledger = Arc::new(self.ledger_for(credential, password_hash)?);
        Ok(PaymentRouter::new(
            Arc::clone(&self.aggregator),
            ledger,
            Arc::clone(&self.vendors),
        ))
    }

    /// Background reconciler, or `None` when disabled.
    pub fn reconciler(&self) -> Option<Reconciler> {
        self.reconcile_interval
            .map(|interval| Reconciler::new(Arc::clone(&self.ledger)).with_interval(interval))
    }

    /// Teardown: drop every pooled RPC connection.
    pub fn shutdown(&self) {
        self.pool.clear();
    }
}

fn risk_providers(
    config: &RiskProviderConfig,
    timeout: Duration,
) -> Result<Vec<Arc<dyn SignalProvider>>, SignalProviderError> {
    let provider: Arc<dyn SignalProvider> = match config {
        RiskProviderConfig::None => Arc::new(NullSignalProvider),
        RiskProviderConfig::Http { base_url, api_key } => Arc::new(HttpSignalProvider::new(
            "threat-api",
            base_url,
            api_key.as_str(),
            timeout,
        )?),
        RiskProviderConfig::Tool { endpoint, api_key } => Arc::new(ToolCallSignalProvider::new(
            "risk-tools",
            endpoint,
            api_key.as_ref().map(|key| key.to_string()),
            timeout,
        )?),
    };
    Ok(vec![provider])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::EndpointConfig;
    use crate::risk::RiskLevel;
    use crate::routing::VendorRecord;
    use alloy::primitives::Address;
    use zeroize::Zeroizing;

    fn config(dir: &std::path::Path, risk_provider: RiskProviderConfig) -> EngineConfig {
        EngineConfig {
            master_key: Zeroizing::new("test-master-key".to_string()),
            endpoints: vec![EndpointConfig::new("dead", "http://127.0.0.1:1", 43113)],
            chain_id: 43113,
            escrow_address: Address::repeat_byte(0xe5),
            dispute_address: Address::repeat_byte(0xd1),
            mirror_db_path: dir.join("nested").join("mirror.redb"),
            risk_provider,
            risk_chain: "avalanche".to_string(),
            rpc_timeout: Duration::from_secs(1),
            signal_timeout: Duration::from_secs(1),
            reconcile_interval: None,
        }
    }

    fn connector(config: &EngineConfig) -> Arc<ChainConnector> {
        Arc::new(
            ChainConnector::new(
                Arc::new(ConnectionPool::new()),
                &config.endpoints[0],
                None,
                config.rpc_timeout,
            )
            .unwrap(),
        )
    }

    fn assemble(config: &EngineConfig) -> EngineState {
        EngineState::assemble(
            config,
            connector(config),
            Arc::new(InMemoryVendorDirectory::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn assembles_with_null_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RiskProviderConfig::None);
        let state = assemble(&config);

        assert_eq!(state.aggregator.provider_names(), vec!["null"]);
        assert!(state.ledger.chain().signer_address().is_none());
        assert!(state.reconciler().is_none());
        assert!(config.mirror_db_path.exists());

        let assessment = state
            .aggregator
            .check_wallet_safety("0xabc", &state.risk_chain)
            .await;
        assert!(assessment.is_fallback());
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn selects_configured_transport() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            RiskProviderConfig::Tool {
                endpoint: "http://127.0.0.1:1/rpc".to_string(),
                api_key: None,
            },
        );
        let state = assemble(&config);
        assert_eq!(state.aggregator.provider_names(), vec!["risk-tools"]);
    }

    #[tokio::test]
    async fn ledger_for_signs_with_the_credential_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RiskProviderConfig::None);
        let state = assemble(&config);

        let credential = state.vault.create_wallet("password-hash").unwrap();
        let ledger = state.ledger_for(&credential, "password-hash").unwrap();
        let signer = ledger.chain().signer_address().unwrap();
        assert!(signer.to_string().eq_ignore_ascii_case(&credential.address));

        assert!(matches!(
            state.ledger_for(&credential, "other-hash"),
            Err(StateError::Signing(_))
        ));
        assert!(state.router_for(&credential, "password-hash").is_ok());
    }

    #[tokio::test]
    async fn vendor_directory_is_shared_with_router() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), RiskProviderConfig::None);
        let vendors = Arc::new(InMemoryVendorDirectory::new());
        vendors.insert(
            "v1",
            VendorRecord {
                wallet_address: Address::repeat_byte(0x22),
                chain: "avalanche".to_string(),
                average_rating: None,
            },
        );
        let state = EngineState::assemble(&config, connector(&config), vendors).unwrap();

        let profile = state.router.vendor_profile("v1").await.unwrap();
        assert_eq!(profile.reputation.total_transactions, 0);
        assert_eq!(profile.risk_level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn shutdown_clears_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), RiskProviderConfig::None);
        config.reconcile_interval = Some(Duration::from_secs(5));
        let state = assemble(&config);

        assert!(!state.pool.is_empty());
        assert!(state.reconciler().is_some());
        state.shutdown();
        assert!(state.pool.is_empty());
    }
}
