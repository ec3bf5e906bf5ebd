// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain types and constants.

use std::time::Duration;

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};

/// Well-known network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: &'static str,
    /// Block explorer URL
    pub explorer_url: &'static str,
}

/// Avalanche C-Chain Mainnet configuration.
pub const AVAX_MAINNET: NetworkConfig = NetworkConfig {
    name: "Avalanche C-Chain",
    chain_id: 43114,
    rpc_url: "https://api.avax.network/ext/bc/C/rpc",
    explorer_url: "https://snowtrace.io",
};

/// Avalanche Fuji Testnet configuration.
pub const AVAX_FUJI: NetworkConfig = NetworkConfig {
    name: "Avalanche Fuji Testnet",
    chain_id: 43113,
    rpc_url: "https://api.avax-test.network/ext/bc/C/rpc",
    explorer_url: "https://testnet.snowtrace.io",
};

/// One candidate RPC endpoint. Connections are cached by `(rpc_url, chain_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Label used in logs and errors (RPC URLs may embed API keys).
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            rpc_url: rpc_url.into(),
            chain_id,
        }
    }

    /// Identity of the endpoint in the connection pool.
    pub fn cache_key(&self) -> (String, u64) {
        (self.rpc_url.clone(), self.chain_id)
    }

    pub fn parsed_url(&self) -> Result<url::Url, ChainError> {
        self.rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidEndpoint(format!("{}: {e}", self.name)))
    }
}

impl From<&NetworkConfig> for EndpointConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self::new(network.name, network.rpc_url, network.chain_id)
    }
}

/// Marker address for the chain's native currency.
pub const NATIVE_TOKEN: Address = Address::ZERO;

/// Known ERC-20 tokens.
#[derive(Debug, Clone)]
pub struct Erc20Token {
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u8,
    /// Mainnet contract address
    pub mainnet_address: Option<Address>,
    /// Fuji testnet contract address
    pub fuji_address: Option<Address>,
}

impl Erc20Token {
    fn address_on(&self, chain_id: u64) -> Option<Address> {
        match chain_id {
            id if id == AVAX_MAINNET.chain_id => self.mainnet_address,
            id if id == AVAX_FUJI.chain_id => self.fuji_address,
            _ => None,
        }
    }
}

/// USDC.
pub const USDC_TOKEN: Erc20Token = Erc20Token {
    symbol: "USDC",
    name: "USD Coin",
    decimals: 6,
    mainnet_address: Some(address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E")),
    fuji_address: Some(address!("5425890298aed601595a70AB815c96711a31Bc65")),
};

/// Relational Euro (`rEUR`) token deployed on Fuji.
pub const REUR_TOKEN: Erc20Token = Erc20Token {
    symbol: "rEUR",
    name: "Relational Euro",
    decimals: 6,
    mainnet_address: None,
    fuji_address: Some(address!("76568BEd5Acf1A5Cd888773C8cAe9ea2a9131A63")),
};

/// Tokens the engine knows how to price and display.
pub const KNOWN_TOKENS: &[Erc20Token] = &[USDC_TOKEN, REUR_TOKEN];

/// Registry entry returned by [`token_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u8,
    pub address: Address,
    /// `false` only for the [`TokenInfo::unknown`] sentinel.
    pub known: bool,
}

impl TokenInfo {
    /// Sentinel for addresses outside the registry. Decimals default to 18.
    pub fn unknown(address: Address) -> Self {
        Self {
            symbol: "UNKNOWN",
            name: "Unknown Token",
            decimals: 18,
            address,
            known: false,
        }
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN
    }
}

/// Look up a token by address on the given chain. Never fails.
pub fn token_info(chain_id: u64, token: Address) -> TokenInfo {
    if token == NATIVE_TOKEN {
        return TokenInfo {
            symbol: "AVAX",
            name: "Avalanche",
            decimals: 18,
            address: NATIVE_TOKEN,
            known: true,
        };
    }

    KNOWN_TOKENS
        .iter()
        .find(|t| t.address_on(chain_id) == Some(token))
        .map(|t| TokenInfo {
            symbol: t.symbol,
            name: t.name,
            decimals: t.decimals,
            address: token,
            known: true,
        })
        .unwrap_or_else(|| TokenInfo::unknown(token))
}

/// Errors that can occur during chain connectivity and encoding.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Provider unavailable: {endpoint}")]
    ProviderUnavailable { endpoint: String },

    #[error("No provider available: {attempted} candidate endpoint(s) failed liveness checks")]
    NoProviderAvailable { attempted: usize },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_token_is_known() {
        let info = token_info(AVAX_FUJI.chain_id, NATIVE_TOKEN);
        assert!(info.known);
        assert!(info.is_native());
        assert_eq!(info.decimals, 18);
    }

    #[test]
    fn registry_lookup_is_chain_scoped() {
        let usdc_fuji = address!("5425890298aed601595a70AB815c96711a31Bc65");
        let info = token_info(AVAX_FUJI.chain_id, usdc_fuji);
        assert_eq!(info.symbol, "USDC");
        assert_eq!(info.decimals, 6);

        // Same address on mainnet is not the registered USDC.
        assert!(!token_info(AVAX_MAINNET.chain_id, usdc_fuji).known);
    }

    #[test]
    fn unknown_address_returns_sentinel() {
        let stranger = address!("00000000000000000000000000000000deadbeef");
        let info = token_info(AVAX_FUJI.chain_id, stranger);
        assert_eq!(info, TokenInfo::unknown(stranger));
        assert_eq!(info.symbol, "UNKNOWN");
        assert!(!info.known);
    }

    #[test]
    fn endpoint_cache_key_includes_chain_id() {
        let a = EndpointConfig::new("a", "http://localhost:8545", 1);
        let b = EndpointConfig::new("b", "http://localhost:8545", 2);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(
            EndpointConfig::from(&AVAX_FUJI).cache_key(),
            (AVAX_FUJI.rpc_url.to_string(), 43113)
        );
    }

    #[test]
    fn invalid_rpc_url_is_rejected() {
        let endpoint = EndpointConfig::new("broken", "not a url", 1);
        assert!(matches!(
            endpoint.parsed_url(),
            Err(ChainError::InvalidEndpoint(_))
        ));
        let err = endpoint.parsed_url().unwrap_err();
        assert!(err.to_string().starts_with("Invalid endpoint: broken"));
    }
}
