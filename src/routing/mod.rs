// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment routing.
//!
//! Turns a risk assessment into a payment method (direct, escrow, blocked)
//! and a vendor verification status. Unknown risk labels route to escrow;
//! the router never falls back to a direct transfer.

pub mod vendors;

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blockchain::GatewayError;
use crate::escrow::{CreateEscrowRequest, EscrowLedger, LedgerError, TransactionMirror};
use crate::risk::{EnhancedAssessment, RiskLevel, RiskSignalAggregator};

pub use vendors::{InMemoryVendorDirectory, VendorDirectory, VendorRecord};

/// Security deposit for high-risk vendors, in USDC base units (6 decimals).
pub const DEFAULT_SECURITY_DEPOSIT: U256 = U256::from_limbs([100_000_000, 0, 0, 0]);

/// Vendors above this success rate (and at low risk) are verified.
pub const VERIFIED_SUCCESS_RATE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Direct,
    Escrow,
    Blocked,
}

impl PaymentMethod {
    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Critical => PaymentMethod::Blocked,
            RiskLevel::High | RiskLevel::Medium => PaymentMethod::Escrow,
            RiskLevel::Low => PaymentMethod::Direct,
        }
    }

    /// Unrecognized labels route to escrow.
    pub fn for_label(label: &str) -> Self {
        RiskLevel::parse(label)
            .map(Self::for_level)
            .unwrap_or(PaymentMethod::Escrow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDecision {
    pub is_approved: bool,
    pub payment_method: PaymentMethod,
    pub requires_escrow: bool,
    pub recommended_action: String,
}

impl PaymentDecision {
    fn from_method(payment_method: PaymentMethod) -> Self {
        let recommended_action = match payment_method {
            PaymentMethod::Direct => "Proceed with direct payment",
            PaymentMethod::Escrow => "Hold funds in escrow until delivery is confirmed",
            PaymentMethod::Blocked => "Do not proceed: counterparty or transfer is high risk",
        };
        Self {
            is_approved: payment_method != PaymentMethod::Blocked,
            payment_method,
            requires_escrow: payment_method == PaymentMethod::Escrow,
            recommended_action: recommended_action.to_string(),
        }
    }
}

pub fn determine_payment_method(level: RiskLevel) -> PaymentDecision {
    PaymentDecision::from_method(PaymentMethod::for_level(level))
}

/// Same as [`determine_payment_method`] for a raw provider label.
pub fn determine_payment_method_for_label(label: &str) -> PaymentDecision {
    PaymentDecision::from_method(PaymentMethod::for_label(label))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Flagged,
}

pub fn verification_status(level: RiskLevel, success_rate: f64) -> VerificationStatus {
    match level {
        RiskLevel::Critical => VerificationStatus::Flagged,
        RiskLevel::High => VerificationStatus::Pending,
        RiskLevel::Low if success_rate > VERIFIED_SUCCESS_RATE => VerificationStatus::Verified,
        _ => VerificationStatus::Unverified,
    }
}

/// Listing fee multiplier in basis points (`10_000` = 1.0x).
pub fn listing_fee_multiplier_bps(level: RiskLevel) -> u32 {
    match level {
        RiskLevel::Low => 10_000,
        RiskLevel::Medium => 15_000,
        RiskLevel::High => 20_000,
        RiskLevel::Critical => 0,
    }
}

/// Fee for listing at `level`, or `None` when the vendor may not list.
pub fn listing_fee(base_fee: U256, level: RiskLevel) -> Option<U256> {
    match listing_fee_multiplier_bps(level) {
        0 => None,
        bps => base_fee
            .checked_mul(U256::from(bps))
            .map(|scaled| scaled / U256::from(10_000u32)),
    }
}

pub fn security_deposit_required(level: RiskLevel) -> bool {
    level == RiskLevel::High
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorReputation {
    pub total_transactions: u64,
    pub success_rate: f64,
    pub dispute_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorSafetyProfile {
    pub vendor_id: String,
    pub wallet_address: Address,
    pub safety_score: u8,
    pub risk_level: RiskLevel,
    pub verification_status: VerificationStatus,
    pub reputation: VendorReputation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvaluation {
    pub assessment: EnhancedAssessment,
    pub decision: PaymentDecision,
}

/// What [`PaymentRouter::route_payment`] did with a request.
#[derive(Debug, Clone)]
pub enum RoutedPayment {
    /// Rejected before touching the chain.
    Blocked(TransactionEvaluation),
    /// Safe for a direct transfer; no escrow was created.
    Direct(TransactionEvaluation),
    Escrowed {
        evaluation: TransactionEvaluation,
        mirror: Box<TransactionMirror>,
    },
}

impl RoutedPayment {
    pub fn evaluation(&self) -> &TransactionEvaluation {
        match self {
            RoutedPayment::Blocked(evaluation)
            | RoutedPayment::Direct(evaluation)
            | RoutedPayment::Escrowed { evaluation, .. } => evaluation,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("vendor {0} not found")]
    VendorNotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct PaymentRouter {
    aggregator: Arc<RiskSignalAggregator>,
    ledger: Arc<EscrowLedger>,
    vendors: Arc<dyn VendorDirectory>,
    security_deposit: U256,
}

impl PaymentRouter {
    pub fn new(
        aggregator: Arc<RiskSignalAggregator>,
        ledger: Arc<EscrowLedger>,
        vendors: Arc<dyn VendorDirectory>,
    ) -> Self {
        Self {
            aggregator,
            ledger,
            vendors,
            security_deposit: DEFAULT_SECURITY_DEPOSIT,
        }
    }

    pub fn with_security_deposit(mut self, amount: U256) -> Self {
        self.security_deposit = amount;
        self
    }

    /// Assess buyer, vendor and transfer, and decide how funds may move.
    pub async fn evaluate_transaction(
        &self,
        buyer_wallet: &str,
        vendor_wallet: &str,
        amount: &str,
        chain: &str,
    ) -> TransactionEvaluation {
        let assessment = self
            .aggregator
            .enhanced_transaction_safety(buyer_wallet, vendor_wallet, amount, chain)
            .await;
        let decision = determine_payment_method(assessment.overall.risk_level);
        TransactionEvaluation {
            assessment,
            decision,
        }
    }

    /// Evaluate the request and, if escrow is required, create it.
    ///
    /// The buyer is the ledger's signing wallet.
    pub async fn route_payment(
        &self,
        request: CreateEscrowRequest,
        chain: &str,
    ) -> Result<RoutedPayment, RoutingError> {
        let buyer = self.ledger.chain().signer_address().ok_or_else(|| {
            LedgerError::Gateway(GatewayError::MissingSigner {
                method: "createEscrow".to_string(),
            })
        })?;

        let evaluation = self
            .evaluate_transaction(
                &buyer.to_string(),
                &request.seller.to_string(),
                &request.amount,
                chain,
            )
            .await;

        info!(
            buyer = %buyer,
            seller = %request.seller,
            level = %evaluation.assessment.overall.risk_level,
            method = ?evaluation.decision.payment_method,
            "Payment routed"
        );

        match evaluation.decision.payment_method {
            PaymentMethod::Blocked => Ok(RoutedPayment::Blocked(evaluation)),
            PaymentMethod::Direct => Ok(RoutedPayment::Direct(evaluation)),
            PaymentMethod::Escrow => {
                let mirror = self.ledger.create(request).await?;
                Ok(RoutedPayment::Escrowed {
                    evaluation,
                    mirror: Box::new(mirror),
                })
            }
        }
    }

    /// Safety score, verification status and track record of a vendor.
    pub async fn vendor_profile(&self, vendor_id: &str) -> Result<VendorSafetyProfile, RoutingError> {
        let vendor = self
            .vendors
            .lookup(vendor_id)
            .await
            .ok_or_else(|| RoutingError::VendorNotFound(vendor_id.to_string()))?;

        let assessment = self
            .aggregator
            .check_wallet_safety(&vendor.wallet_address.to_string(), &vendor.chain)
            .await;
        let record = self.ledger.seller_reputation(vendor.wallet_address)?;

        Ok(VendorSafetyProfile {
            vendor_id: vendor_id.to_string(),
            wallet_address: vendor.wallet_address,
            safety_score: assessment.score,
            risk_level: assessment.risk_level,
            verification_status: verification_status(assessment.risk_level, record.success_rate),
            reputation: VendorReputation {
                total_transactions: record.total_transactions,
                success_rate: record.success_rate,
                dispute_rate: record.dispute_rate,
                average_rating: vendor.average_rating,
            },
        })
    }

    /// Deposit a vendor at `level` must post, if any.
    pub fn security_deposit(&self, level: RiskLevel) -> Option<U256> {
        security_deposit_required(level).then_some(self.security_deposit)
    }
}
