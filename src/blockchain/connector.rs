// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Chain Connector
//!
//! Scoped RPC connection pool plus the active `(endpoint, signer)` pair used
//! by contract gateways.
//!
//! ## Lifecycle
//!
//! A [`ConnectionPool`] is created once at startup and shared (`Arc`) by every
//! connector derived from it. Connections are keyed by `(rpc_url, chain_id)`
//! and live until [`ConnectionPool::clear`] is called at shutdown.
//!
//! ## Switching
//!
//! [`ChainConnector::switch_provider`] probes the candidate before touching
//! any state, then replaces the whole [`ActiveConnection`] snapshot in one
//! atomic store. Gateways resolve a snapshot once per call, so the endpoint,
//! signer and contract binding they use always come from the same snapshot.

use std::sync::Arc;
use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::{token_info, ChainError, EndpointConfig, TokenInfo};
use super::units::format_units;

/// Default timeout for every outbound RPC call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Returned by [`ChainConnector::balance_of`] when the balance cannot be read.
pub const BALANCE_SENTINEL: &str = "0.0";

const NATIVE_DECIMALS: u8 = 18;

/// A cached read-only connection to one endpoint.
pub struct Connection {
    endpoint: EndpointConfig,
    provider: DynProvider,
}

impl Connection {
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

/// Concurrency-safe cache of RPC connections.
#[derive(Default)]
pub struct ConnectionPool {
    connections: DashMap<(String, u64), Arc<Connection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached connection for `endpoint`, creating it if absent.
    ///
    /// Creation happens under the map's shard lock, so concurrent callers for
    /// the same endpoint all receive the instance created first.
    pub fn connect(&self, endpoint: &EndpointConfig) -> Result<Arc<Connection>, ChainError> {
        let url = endpoint.parsed_url()?;
        let entry = self
            .connections
            .entry(endpoint.cache_key())
            .or_insert_with(|| {
                tracing::debug!(endpoint = %endpoint.name, chain_id = endpoint.chain_id, "Opening RPC connection");
                Arc::new(Connection {
                    endpoint: endpoint.clone(),
                    provider: ProviderBuilder::new().connect_http(url).erased(),
                })
            });
        Ok(Arc::clone(entry.value()))
    }

    /// Drop `failed` from the cache so the next `connect` rebuilds it.
    ///
    /// A no-op if the cached entry has already been replaced. Returns
    /// whether an entry was removed.
    pub fn evict(&self, failed: &Arc<Connection>) -> bool {
        self.connections
            .remove_if(&failed.endpoint.cache_key(), |_, cached| {
                Arc::ptr_eq(cached, failed)
            })
            .is_some()
    }

    pub fn contains(&self, endpoint: &EndpointConfig) -> bool {
        self.connections.contains_key(&endpoint.cache_key())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Teardown: drop every cached connection.
    pub fn clear(&self) {
        let count = self.connections.len();
        self.connections.clear();
        info!(count, "Connection pool cleared");
    }
}

/// The endpoint/signer pair a connector currently routes through.
pub struct ActiveConnection {
    connection: Arc<Connection>,
    signer_address: Option<Address>,
    write_provider: Option<DynProvider>,
}

impl ActiveConnection {
    fn build(
        connection: Arc<Connection>,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<Self, ChainError> {
        let (signer_address, write_provider) = match signer {
            Some(signer) => {
                let url = connection.endpoint.parsed_url()?;
                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer.clone()))
                    .connect_http(url)
                    .erased();
                (Some(signer.address()), Some(provider))
            }
            None => (None, None),
        };

        Ok(Self {
            connection,
            signer_address,
            write_provider,
        })
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.connection.endpoint
    }

    /// Read-only provider.
    pub fn provider(&self) -> &DynProvider {
        &self.connection.provider
    }

    /// Signing provider, `None` for read-only connectors.
    pub fn write_provider(&self) -> Option<&DynProvider> {
        self.write_provider.as_ref()
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer_address
    }
}

/// RPC access for one signer (or none) over a shared [`ConnectionPool`].
pub struct ChainConnector {
    pool: Arc<ConnectionPool>,
    active: ArcSwap<ActiveConnection>,
    signer: Option<PrivateKeySigner>,
    switch_lock: Mutex<()>,
    timeout: Duration,
}

impl ChainConnector {
    /// Bind to `endpoint` without probing it.
    pub fn new(
        pool: Arc<ConnectionPool>,
        endpoint: &EndpointConfig,
        signer: Option<PrivateKeySigner>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let connection = pool.connect(endpoint)?;
        let active = ActiveConnection::build(connection, signer.as_ref())?;
        Ok(Self {
            pool,
            active: ArcSwap::from_pointee(active),
            signer,
            switch_lock: Mutex::new(()),
            timeout,
        })
    }

    /// Try `candidates` in order and bind to the first one that passes a
    /// liveness probe.
    ///
    /// # Errors
    /// [`ChainError::NoProviderAvailable`] if every candidate fails.
    pub async fn create_with_fallback(
        pool: Arc<ConnectionPool>,
        candidates: &[EndpointConfig],
        signer: Option<PrivateKeySigner>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        for (idx, endpoint) in candidates.iter().enumerate() {
            let connection = match pool.connect(endpoint) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(candidate = idx, endpoint = %endpoint.name, error = %e, "Skipping RPC candidate");
                    continue;
                }
            };

            match probe(&connection, timeout).await {
                Ok(()) => {
                    info!(candidate = idx, endpoint = %endpoint.name, chain_id = endpoint.chain_id, "RPC endpoint selected");
                    let active = ActiveConnection::build(connection, signer.as_ref())?;
                    return Ok(Self {
                        pool,
                        active: ArcSwap::from_pointee(active),
                        signer,
                        switch_lock: Mutex::new(()),
                        timeout,
                    });
                }
                Err(e) => {
                    warn!(candidate = idx, endpoint = %endpoint.name, error = %e, "RPC candidate failed liveness probe");
                    pool.evict(&connection);
                }
            }
        }

        Err(ChainError::NoProviderAvailable {
            attempted: candidates.len(),
        })
    }

    /// Derive a connector for another custodial signer, sharing this pool and
    /// the current endpoint.
    pub fn with_signer(&self, signer: PrivateKeySigner) -> Result<Self, ChainError> {
        let current = self.active.load_full();
        let active = ActiveConnection::build(Arc::clone(&current.connection), Some(&signer))?;
        Ok(Self {
            pool: Arc::clone(&self.pool),
            active: ArcSwap::from_pointee(active),
            signer: Some(signer),
            switch_lock: Mutex::new(()),
            timeout: self.timeout,
        })
    }

    /// Cached connection for `endpoint` from the shared pool.
    pub fn connect(&self, endpoint: &EndpointConfig) -> Result<Arc<Connection>, ChainError> {
        self.pool.connect(endpoint)
    }

    /// Lightweight liveness probe of the active endpoint.
    pub async fn test_connection(&self) -> bool {
        let current = self.active.load_full();
        probe(&current.connection, self.timeout).await.is_ok()
    }

    /// Current snapshot, verified live.
    ///
    /// If the probe fails the connection is rebuilt once; a second failure
    /// is [`ChainError::ProviderUnavailable`].
    pub async fn get_provider(&self) -> Result<Arc<ActiveConnection>, ChainError> {
        let snapshot = self.active.load_full();
        if probe(&snapshot.connection, self.timeout).await.is_ok() {
            return Ok(snapshot);
        }

        warn!(endpoint = %snapshot.endpoint().name, "Active RPC endpoint failed liveness probe, reconnecting");

        let _guard = self.switch_lock.lock().await;
        let current = self.active.load_full();
        if !Arc::ptr_eq(&current, &snapshot) {
            // Replaced while we waited; the replacement was probed by its writer.
            return Ok(current);
        }

        let endpoint = snapshot.endpoint().clone();
        self.pool.evict(&snapshot.connection);
        let connection = self.pool.connect(&endpoint)?;

        match probe(&connection, self.timeout).await {
            Ok(()) => {
                let active = Arc::new(ActiveConnection::build(connection, self.signer.as_ref())?);
                self.active.store(Arc::clone(&active));
                info!(endpoint = %endpoint.name, "RPC endpoint reconnected");
                Ok(active)
            }
            Err(e) => {
                warn!(endpoint = %endpoint.name, error = %e, "RPC reconnect failed");
                Err(ChainError::ProviderUnavailable {
                    endpoint: endpoint.name,
                })
            }
        }
    }

    /// Validate `endpoint`, then swap it in together with the signer.
    ///
    /// On failure nothing changes.
    pub async fn switch_provider(&self, endpoint: &EndpointConfig) -> Result<(), ChainError> {
        let _guard = self.switch_lock.lock().await;

        let connection = self.pool.connect(endpoint)?;
        if let Err(e) = probe(&connection, self.timeout).await {
            warn!(endpoint = %endpoint.name, error = %e, "Refusing to switch to unverified endpoint");
            self.pool.evict(&connection);
            return Err(ChainError::ProviderUnavailable {
                endpoint: endpoint.name.clone(),
            });
        }

        let active = ActiveConnection::build(connection, self.signer.as_ref())?;
        let previous = self.active.swap(Arc::new(active));
        info!(
            from = %previous.endpoint().name,
            to = %endpoint.name,
            "Switched RPC endpoint"
        );
        Ok(())
    }

    /// Snapshot without a liveness probe.
    pub fn current(&self) -> Arc<ActiveConnection> {
        self.active.load_full()
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn chain_id(&self) -> u64 {
        self.active.load().endpoint().chain_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Native balance as a decimal string, or [`BALANCE_SENTINEL`] on any
    /// failure. For display only.
    pub async fn balance_of(&self, address: &str) -> String {
        match self.try_balance_of(address).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(address = %address, error = %e, "Balance query failed, returning sentinel");
                BALANCE_SENTINEL.to_string()
            }
        }
    }

    async fn try_balance_of(&self, address: &str) -> Result<String, ChainError> {
        let address: Address = address
            .parse()
            .map_err(|e| ChainError::InvalidAddress(format!("{e}")))?;
        let active = self.get_provider().await?;
        let provider = active.provider();

        let balance = tokio::time::timeout(self.timeout, async {
            provider.get_balance(address).await
        })
        .await
        .map_err(|_| ChainError::Timeout(self.timeout))?
        .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(format_units(balance, NATIVE_DECIMALS))
    }

    /// Registry metadata for `token` on the active chain.
    pub fn token_info(&self, token: Address) -> TokenInfo {
        token_info(self.chain_id(), token)
    }
}

/// Liveness probe: the endpoint answers `eth_chainId` with the configured id.
async fn probe(connection: &Connection, timeout: Duration) -> Result<(), ChainError> {
    let provider = &connection.provider;
    let chain_id = tokio::time::timeout(timeout, async { provider.get_chain_id().await })
        .await
        .map_err(|_| ChainError::Timeout(timeout))?
        .map_err(|e| ChainError::Rpc(e.to_string()))?;

    if chain_id != connection.endpoint.chain_id {
        return Err(ChainError::Rpc(format!(
            "chain id mismatch: expected {}, endpoint reports {chain_id}",
            connection.endpoint.chain_id
        )));
    }
    Ok(())
}
