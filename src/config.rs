// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `KEY_VAULT_MASTER_KEY` | Master key for custodial key envelopes | Required |
//! | `RPC_URLS` | Comma-separated RPC endpoints, in fallback order | Avalanche Fuji public RPC |
//! | `CHAIN_ID` | Chain id shared by every endpoint | `43113` |
//! | `ESCROW_CONTRACT_ADDRESS` | Escrow contract | Required |
//! | `DISPUTE_CONTRACT_ADDRESS` | Dispute contract | Required |
//! | `MIRROR_DB_PATH` | redb file holding transaction mirrors | `./data/escrow-mirror.redb` |
//! | `RISK_PROVIDER` | `none`, `http` or `tool` | `none` |
//! | `RISK_API_URL` | Risk provider base URL / tool-call endpoint | Optional |
//! | `RISK_API_KEY` | Risk provider credential | Optional |
//! | `RISK_CHAIN` | Chain label sent to risk providers | `avalanche` |
//! | `RPC_TIMEOUT_SECS` | Chain call timeout | `10` |
//! | `SIGNAL_TIMEOUT_SECS` | Per-provider risk check timeout | `10` |
//! | `RECONCILE_INTERVAL_SECS` | Mirror reconciliation interval, `0` disables | `60` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use zeroize::Zeroizing;

use crate::blockchain::{EndpointConfig, AVAX_FUJI};

pub const MASTER_KEY_ENV: &str = "KEY_VAULT_MASTER_KEY";
pub const RPC_URLS_ENV: &str = "RPC_URLS";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";
pub const ESCROW_ADDRESS_ENV: &str = "ESCROW_CONTRACT_ADDRESS";
pub const DISPUTE_ADDRESS_ENV: &str = "DISPUTE_CONTRACT_ADDRESS";
pub const MIRROR_DB_PATH_ENV: &str = "MIRROR_DB_PATH";
pub const RISK_PROVIDER_ENV: &str = "RISK_PROVIDER";
pub const RISK_API_URL_ENV: &str = "RISK_API_URL";
pub const RISK_API_KEY_ENV: &str = "RISK_API_KEY";
pub const RISK_CHAIN_ENV: &str = "RISK_CHAIN";
pub const RPC_TIMEOUT_ENV: &str = "RPC_TIMEOUT_SECS";
pub const SIGNAL_TIMEOUT_ENV: &str = "SIGNAL_TIMEOUT_SECS";
pub const RECONCILE_INTERVAL_ENV: &str = "RECONCILE_INTERVAL_SECS";

/// Logging format switch, read by [`crate::logging::init`].
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_MIRROR_DB_PATH: &str = "./data/escrow-mirror.redb";
pub const DEFAULT_RISK_CHAIN: &str = "avalanche";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which transport, if any, feeds the risk aggregator.
#[derive(Clone, PartialEq, Eq)]
pub enum RiskProviderConfig {
    None,
    Http {
        base_url: String,
        api_key: Zeroizing<String>,
    },
    Tool {
        endpoint: String,
        api_key: Option<Zeroizing<String>>,
    },
}

impl fmt::Debug for RiskProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskProviderConfig::None => f.write_str("None"),
            RiskProviderConfig::Http { base_url, .. } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_key", &"<redacted>")
                .finish(),
            RiskProviderConfig::Tool { endpoint, api_key } => f
                .debug_struct("Tool")
                .field("endpoint", endpoint)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub master_key: Zeroizing<String>,
    pub endpoints: Vec<EndpointConfig>,
    pub chain_id: u64,
    pub escrow_address: Address,
    pub dispute_address: Address,
    pub mirror_db_path: PathBuf,
    pub risk_provider: RiskProviderConfig,
    pub risk_chain: String,
    pub rpc_timeout: Duration,
    pub signal_timeout: Duration,
    /// `None` when background reconciliation is disabled.
    pub reconcile_interval: Option<Duration>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("master_key", &"<redacted>")
            .field(
                "endpoints",
                &self.endpoints.iter().map(|e| &e.name).collect::<Vec<_>>(),
            )
            .field("chain_id", &self.chain_id)
            .field("escrow_address", &self.escrow_address)
            .field("dispute_address", &self.dispute_address)
            .field("mirror_db_path", &self.mirror_db_path)
            .field("risk_provider", &self.risk_provider)
            .field("risk_chain", &self.risk_chain)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("signal_timeout", &self.signal_timeout)
            .field("reconcile_interval", &self.reconcile_interval)
            .finish()
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let master_key = get(MASTER_KEY_ENV)
            .map(Zeroizing::new)
            .ok_or(ConfigError::Missing(MASTER_KEY_ENV))?;

        let chain_id = parse_or(get(CHAIN_ID_ENV), CHAIN_ID_ENV, AVAX_FUJI.chain_id)?;
        let endpoints = match get(RPC_URLS_ENV) {
            Some(list) => parse_endpoints(&list, chain_id)?,
            None => vec![EndpointConfig::new(AVAX_FUJI.name, AVAX_FUJI.rpc_url, chain_id)],
        };

        let escrow_address = required_address(get(ESCROW_ADDRESS_ENV), ESCROW_ADDRESS_ENV)?;
        let dispute_address = required_address(get(DISPUTE_ADDRESS_ENV), DISPUTE_ADDRESS_ENV)?;

        let risk_provider = risk_provider(
            get(RISK_PROVIDER_ENV).as_deref(),
            get(RISK_API_URL_ENV),
            get(RISK_API_KEY_ENV),
        )?;

        let reconcile_secs: u64 = parse_or(get(RECONCILE_INTERVAL_ENV), RECONCILE_INTERVAL_ENV, 60)?;

        Ok(Self {
            master_key,
            endpoints,
            chain_id,
            escrow_address,
            dispute_address,
            mirror_db_path: get(MIRROR_DB_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_MIRROR_DB_PATH.to_string())
                .into(),
            risk_provider,
            risk_chain: get(RISK_CHAIN_ENV).unwrap_or_else(|| DEFAULT_RISK_CHAIN.to_string()),
            rpc_timeout: Duration::from_secs(parse_or(get(RPC_TIMEOUT_ENV), RPC_TIMEOUT_ENV, 10)?),
            signal_timeout: Duration::from_secs(parse_or(
                get(SIGNAL_TIMEOUT_ENV),
                SIGNAL_TIMEOUT_ENV,
                10,
            )?),
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn required_address(raw: Option<String>, name: &'static str) -> Result<Address, ConfigError> {
    let raw = raw.ok_or(ConfigError::Missing(name))?;
    raw.parse::<Address>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("{e}"),
    })
}

/// Endpoints are labelled `rpc-0`, `rpc-1`, ... so URLs with embedded API
/// keys never reach the logs.
fn parse_endpoints(list: &str, chain_id: u64) -> Result<Vec<EndpointConfig>, ConfigError> {
    let endpoints: Vec<EndpointConfig> = list
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .enumerate()
        .map(|(idx, url)| EndpointConfig::new(format!("rpc-{idx}"), url, chain_id))
        .collect();

    if endpoints.is_empty() {
        return Err(ConfigError::Invalid {
            name: RPC_URLS_ENV,
            reason: "no endpoints listed".to_string(),
        });
    }
    for endpoint in &endpoints {
        endpoint.parsed_url().map_err(|e| ConfigError::Invalid {
            name: RPC_URLS_ENV,
            reason: e.to_string(),
        })?;
    }
    Ok(endpoints)
}

fn risk_provider(
    kind: Option<&str>,
    url: Option<String>,
    api_key: Option<String>,
) -> Result<RiskProviderConfig, ConfigError> {
    let kind = kind.unwrap_or("none").to_ascii_lowercase();
    let config = match (kind.as_str(), url) {
        ("none", _) => RiskProviderConfig::None,
        ("http", Some(base_url)) => match api_key {
            Some(key) => RiskProviderConfig::Http {
                base_url,
                api_key: Zeroizing::new(key),
            },
            None => {
                tracing::warn!("RISK_API_KEY not set; risk signals disabled");
                RiskProviderConfig::None
            }
        },
        ("tool", Some(endpoint)) => RiskProviderConfig::Tool {
            endpoint,
            api_key: api_key.map(Zeroizing::new),
        },
        ("http" | "tool", None) => {
            tracing::warn!(provider = %kind, "RISK_API_URL not set; risk signals disabled");
            RiskProviderConfig::None
        }
        (other, _) => {
            return Err(ConfigError::Invalid {
                name: RISK_PROVIDER_ENV,
                reason: format!("unknown provider `{other}` (expected none, http or tool)"),
            })
        }
    };
    Ok(config)
}
