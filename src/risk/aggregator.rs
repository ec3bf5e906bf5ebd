// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Merge signals from every configured provider into one assessment.
//!
//! Providers are queried concurrently, each under its own timeout. If any
//! provider fails, times out, or none is configured, the result is the
//! neutral fallback (`score=50`, `medium`, `providers=["fallback"]`).
//! Callers always get an assessment, never an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cache::AssessmentCache;
use super::provider::SignalProvider;
use super::types::{worst_of, EnhancedAssessment, RiskAssessment, SignalReport};

/// Per-provider call timeout.
pub const DEFAULT_SIGNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason appended to every transaction assessment.
pub const STANDARD_TRANSFER_NOTE: &str = "Standard transfer";

#[derive(Debug, Clone)]
enum Subject {
    Wallet { address: String, chain: String },
    Contract { address: String, chain: String },
    Url { url: String },
}

impl Subject {
    fn kind(&self) -> &'static str {
        match self {
            Subject::Wallet { .. } => "wallet",
            Subject::Contract { .. } => "contract",
            Subject::Url { .. } => "url",
        }
    }

    async fn query(&self, provider: &dyn SignalProvider) -> Option<SignalReport> {
        match self {
            Subject::Wallet { address, chain } => provider.check_wallet_safety(address, chain).await,
            Subject::Contract { address, chain } => {
                provider.check_contract_safety(address, chain).await
            }
            Subject::Url { url } => provider.check_url_safety(url).await,
        }
    }
}

pub struct RiskSignalAggregator {
    providers: Vec<Arc<dyn SignalProvider>>,
    timeout: Duration,
    cache: Option<AssessmentCache>,
}

impl RiskSignalAggregator {
    pub fn new(providers: Vec<Arc<dyn SignalProvider>>, timeout: Duration) -> Self {
        Self {
            providers,
            timeout,
            cache: None,
        }
    }

    /// Cache successful wallet assessments.
    pub fn with_cache(mut self, cache: AssessmentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub async fn check_wallet_safety(&self, address: &str, chain: &str) -> RiskAssessment {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(address, chain)) {
            debug!(address, chain, "Wallet assessment served from cache");
            return cached;
        }

        let assessment = self
            .aggregate(Subject::Wallet {
                address: address.to_string(),
                chain: chain.to_string(),
            })
            .await;

        if let Some(cache) = &self.cache {
            cache.put(address, chain, &assessment);
        }
        assessment
    }

    pub async fn check_contract_safety(&self, address: &str, chain: &str) -> RiskAssessment {
        self.aggregate(Subject::Contract {
            address: address.to_string(),
            chain: chain.to_string(),
        })
        .await
    }

    pub async fn check_url_safety(&self, url: &str) -> RiskAssessment {
        self.aggregate(Subject::Url {
            url: url.to_string(),
        })
        .await
    }

    /// Wallet check on the recipient, noted as a standard transfer.
    pub async fn check_transaction_safety(
        &self,
        to: &str,
        value: &str,
        chain: &str,
    ) -> RiskAssessment {
        let mut assessment = self.check_wallet_safety(to, chain).await;
        assessment.reasons.push(STANDARD_TRANSFER_NOTE.to_string());
        debug!(to, value, chain, score = assessment.score, "Transaction assessed");
        assessment
    }

    /// Buyer, vendor and transaction checks, run concurrently. The overall
    /// assessment is the riskiest of the three (buyer first on ties).
    pub async fn enhanced_transaction_safety(
        &self,
        buyer_wallet: &str,
        vendor_wallet: &str,
        amount: &str,
        chain: &str,
    ) -> EnhancedAssessment {
        let (buyer, vendor, transaction) = tokio::join!(
            self.check_wallet_safety(buyer_wallet, chain),
            self.check_wallet_safety(vendor_wallet, chain),
            self.check_transaction_safety(vendor_wallet, amount, chain),
        );

        let overall = worst_of(&[&buyer, &vendor, &transaction])
            .cloned()
            .unwrap_or_else(|| RiskAssessment::fallback(Duration::ZERO));

        info!(
            buyer = %buyer.risk_level,
            vendor = %vendor.risk_level,
            transaction = %transaction.risk_level,
            overall = %overall.risk_level,
            "Enhanced transaction assessment"
        );

        EnhancedAssessment {
            overall,
            buyer,
            vendor,
            transaction,
        }
    }

    async fn aggregate(&self, subject: Subject) -> RiskAssessment {
        let started = Instant::now();
        let check = subject.kind();

        if self.providers.is_empty() {
            debug!(check, "No risk providers configured; using fallback");
            return RiskAssessment::fallback(started.elapsed());
        }

        let mut tasks = JoinSet::new();
        for (index, provider) in self.providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let subject = subject.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, subject.query(provider.as_ref())).await;
                (index, provider.name().to_string(), result)
            });
        }

        let mut reports = Vec::with_capacity(self.providers.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, name, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(check, error = %e, "Risk provider task failed; using fallback");
                    return RiskAssessment::fallback(started.elapsed());
                }
            };
            match result {
                Ok(Some(report)) => reports.push((index, name, report)),
                Ok(None) => {
                    warn!(check, provider = %name, "Risk provider returned no signal; using fallback");
                    return RiskAssessment::fallback(started.elapsed());
                }
                Err(_) => {
                    warn!(
                        check,
                        provider = %name,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Risk provider timed out; using fallback"
                    );
                    return RiskAssessment::fallback(started.elapsed());
                }
            }
        }

        reports.sort_by_key(|(index, _, _)| *index);
        let assessment = RiskAssessment::from_reports(
            reports.iter().map(|(_, name, report)| (name.as_str(), report)),
            started.elapsed(),
        );
        debug!(
            check,
            score = assessment.score,
            level = %assessment.risk_level,
            "Risk signals aggregated"
        );
        assessment
    }
}
