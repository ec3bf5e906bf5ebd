// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow and dispute state machine.
//!
//! The chain is authoritative. Every lifecycle operation validates the
//! transition against the mirror, submits the contract call, and only then
//! advances the mirror. Reads reconcile the mirror toward the chain.
//!
//! Operations on one escrow id are serialized through a per-id lock.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::contract::{extract_escrow_id, CreateEscrowCall, EscrowChain};
use super::types::{
    CreateEscrowRequest, DisputeRecord, EscrowMetadata, EscrowRecord, EscrowStatus, Milestone,
    OnChainDispute, TransactionMirror, Winner,
};
use crate::blockchain::{
    gateway::{GatewayError, TransactionOutcome},
    token_info,
    units::parse_units,
};
use crate::storage::{MirrorDatabase, MirrorDbError};

/// Actor recorded on timeline entries synthesized from chain state.
pub const RECONCILIATION_ACTOR: &str = "chain-reconciliation";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("escrow {escrow_id}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        escrow_id: u64,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    #[error("escrow {0} has no mirror")]
    NotFound(u64),

    /// The creation transaction was mined but its escrow id is unknown.
    /// Needs manual reconciliation; nothing was persisted.
    #[error("escrow created in {tx_hash} but its id could not be recovered ({reason}); needs manual reconciliation")]
    EscrowIdExtraction { tx_hash: B256, reason: String },

    /// The escrow exists on-chain but its mirror could not be stored.
    #[error("escrow {escrow_id} created in {tx_hash} but the mirror was not persisted: {source}")]
    MirrorNotPersisted {
        escrow_id: u64,
        tx_hash: B256,
        #[source]
        source: MirrorDbError,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("mirror storage error: {0}")]
    Storage(#[from] MirrorDbError),
}

/// Chain record, milestones and the reconciled mirror (if one exists).
#[derive(Debug, Clone)]
pub struct EscrowSnapshot {
    pub record: EscrowRecord,
    pub milestones: Vec<Milestone>,
    pub mirror: Option<TransactionMirror>,
}

/// Track record of a seller, computed from mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerReputation {
    pub total_transactions: u64,
    pub success_rate: f64,
    pub dispute_rate: f64,
}

type LockMap = DashMap<u64, Arc<Mutex<()>>>;

pub struct EscrowLedger {
    chain: Arc<dyn EscrowChain>,
    store: Arc<MirrorDatabase>,
    locks: Arc<LockMap>,
}

/// Holds one escrow's lock. On drop the map entry is removed unless another
/// caller holds or waits on the same mutex.
struct EscrowGuard {
    escrow_id: u64,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EscrowGuard {
    fn drop(&mut self) {
        // Release first: the owned guard keeps a reference to the mutex.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.escrow_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl EscrowLedger {
    pub fn new(chain: Arc<dyn EscrowChain>, store: Arc<MirrorDatabase>) -> Self {
        Self {
            chain,
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Same mirror and locks, different chain binding (e.g. another signer).
    pub fn with_chain(&self, chain: Arc<dyn EscrowChain>) -> Self {
        Self {
            chain,
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn chain(&self) -> &Arc<dyn EscrowChain> {
        &self.chain
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an escrow on-chain and persist its mirror.
    pub async fn create(
        &self,
        request: CreateEscrowRequest,
    ) -> Result<TransactionMirror, LedgerError> {
        let buyer = self
            .chain
            .signer_address()
            .ok_or_else(|| GatewayError::MissingSigner {
                method: "createEscrow".to_string(),
            })?;

        if request.description.trim().is_empty() {
            return Err(LedgerError::Validation("description is required".into()));
        }
        if request.seller == Address::ZERO {
            return Err(LedgerError::Validation("seller address is required".into()));
        }
        if request.seller == buyer {
            return Err(LedgerError::Validation(
                "buyer and seller must differ".into(),
            ));
        }

        let token = token_info(self.chain.chain_id(), request.token);
        let amount = parse_amount(&request.amount, token.decimals)?;

        let mut milestone_amounts = Vec::with_capacity(request.milestones.len());
        for (i, milestone) in request.milestones.iter().enumerate() {
            let value = parse_amount(&milestone.amount, token.decimals)
                .map_err(|e| LedgerError::Validation(format!("milestone {i}: {e}")))?;
            milestone_amounts.push(value);
        }
        if !milestone_amounts.is_empty() {
            let total = milestone_amounts
                .iter()
                .try_fold(U256::ZERO, |acc, v| acc.checked_add(*v))
                .ok_or_else(|| LedgerError::Validation("milestone total overflows".into()))?;
            if total != amount {
                return Err(LedgerError::Validation(format!(
                    "milestone amounts sum to {total}, escrow amount is {amount}"
                )));
            }
        }

        if !token.is_native() && !self.chain.is_supported_token(request.token).await? {
            return Err(LedgerError::Validation(format!(
                "token {} is not supported by the escrow contract",
                request.token
            )));
        }

        let metadata = EscrowMetadata {
            description: request.description.clone(),
            milestones: request.milestones.clone(),
            token: request.token,
            amount: request.amount.clone(),
        };
        let metadata_hash = metadata
            .content_hash()
            .map_err(|e| LedgerError::Validation(format!("metadata not serializable: {e}")))?;

        let outcome = self
            .chain
            .create_escrow(CreateEscrowCall {
                seller: request.seller,
                token: request.token,
                amount,
                description: request.description.clone(),
                metadata_hash,
                milestone_amounts,
                milestone_descriptions: request
                    .milestones
                    .iter()
                    .map(|m| m.description.clone())
                    .collect(),
            })
            .await?;

        let escrow_id = extract_escrow_id(&outcome.logs, self.chain.escrow_address()).map_err(
            |reason| {
                error!(
                    tx_hash = %outcome.tx_hash,
                    reason = %reason,
                    "Escrow created on-chain but id recovery failed; needs manual reconciliation"
                );
                LedgerError::EscrowIdExtraction {
                    tx_hash: outcome.tx_hash,
                    reason,
                }
            },
        )?;

        let mirror = TransactionMirror::new_created(
            escrow_id,
            buyer,
            &request,
            &token.symbol,
            metadata,
            outcome.tx_hash,
        );
        self.store.insert_mirror(&mirror).map_err(|source| {
            error!(
                escrow_id,
                tx_hash = %outcome.tx_hash,
                error = %source,
                "Escrow created on-chain but mirror was not persisted"
            );
            LedgerError::MirrorNotPersisted {
                escrow_id,
                tx_hash: outcome.tx_hash,
                source,
            }
        })?;

        info!(
            escrow_id,
            transaction_id = %mirror.transaction_id,
            tx_hash = %outcome.tx_hash,
            currency = %mirror.currency,
            "Escrow created"
        );
        Ok(mirror)
    }

    /// Deposit the escrow amount.
    pub async fn fund(&self, escrow_id: u64) -> Result<TransactionMirror, LedgerError> {
        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        ensure_transition(&mirror, EscrowStatus::Funded)?;

        let token = mirror.metadata.token;
        let decimals = token_info(self.chain.chain_id(), token).decimals;
        let amount = parse_amount(&mirror.amount, decimals)?;

        let outcome = self.chain.fund_escrow(escrow_id, token, amount).await?;
        mirror.advance(
            EscrowStatus::Funded,
            "Escrow funded",
            self.actor(),
            Some(outcome.tx_hash),
        );
        self.persist(&mirror, &outcome)?;

        info!(escrow_id, tx_hash = %outcome.tx_hash, "Escrow funded");
        Ok(mirror)
    }

    /// Release one milestone. The escrow completes once every milestone
    /// has been released; a milestone-less escrow releases as index 0.
    pub async fn release(
        &self,
        escrow_id: u64,
        milestone_index: u64,
    ) -> Result<TransactionMirror, LedgerError> {
        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        if mirror.status != EscrowStatus::Funded {
            return Err(LedgerError::InvalidTransition {
                escrow_id,
                from: mirror.status,
                to: EscrowStatus::Completed,
            });
        }
        if milestone_index >= mirror.milestone_count() {
            return Err(LedgerError::Validation(format!(
                "milestone {milestone_index} out of range (escrow has {})",
                mirror.milestone_count()
            )));
        }
        if mirror.released_milestones.contains(&milestone_index) {
            return Err(LedgerError::Validation(format!(
                "milestone {milestone_index} already released"
            )));
        }

        let outcome = self.chain.release_payment(escrow_id, milestone_index).await?;
        mirror.released_milestones.push(milestone_index);
        if mirror.all_milestones_released() {
            mirror.advance(
                EscrowStatus::Completed,
                "Final payment released to seller",
                self.actor(),
                Some(outcome.tx_hash),
            );
        } else {
            mirror.note(
                format!("Milestone {milestone_index} released to seller"),
                self.actor(),
                Some(outcome.tx_hash),
            );
        }
        self.persist(&mirror, &outcome)?;

        info!(
            escrow_id,
            milestone_index,
            status = ?mirror.status,
            tx_hash = %outcome.tx_hash,
            "Milestone released"
        );
        Ok(mirror)
    }

    /// Cancel the escrow, returning any deposit to the buyer.
    pub async fn refund(&self, escrow_id: u64) -> Result<TransactionMirror, LedgerError> {
        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        ensure_transition(&mirror, EscrowStatus::Cancelled)?;

        let outcome = self.chain.cancel_escrow(escrow_id).await?;
        mirror.advance(
            EscrowStatus::Cancelled,
            "Escrow cancelled and refunded to buyer",
            self.actor(),
            Some(outcome.tx_hash),
        );
        self.persist(&mirror, &outcome)?;

        info!(escrow_id, tx_hash = %outcome.tx_hash, "Escrow refunded");
        Ok(mirror)
    }

    /// File a dispute, then submit each piece of evidence.
    ///
    /// Evidence is submitted one call at a time; if one fails, the mirror
    /// keeps the evidence accepted so far and the error is returned.
    pub async fn dispute(
        &self,
        escrow_id: u64,
        reason: &str,
        evidence: &[String],
    ) -> Result<TransactionMirror, LedgerError> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("dispute reason is required".into()));
        }

        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        ensure_transition(&mirror, EscrowStatus::Disputed)?;

        let outcome = self.chain.file_dispute(escrow_id, reason).await?;
        mirror.advance(
            EscrowStatus::Disputed,
            format!("Dispute filed: {reason}"),
            self.actor(),
            Some(outcome.tx_hash),
        );
        mirror.dispute = Some(DisputeRecord {
            reason: reason.to_string(),
            evidence: Vec::new(),
            arbitrator: None,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        });
        self.persist(&mirror, &outcome)?;
        info!(escrow_id, tx_hash = %outcome.tx_hash, "Dispute filed");

        for item in evidence {
            self.submit_evidence(&mut mirror, item).await?;
        }
        Ok(mirror)
    }

    /// Attach evidence to an open dispute.
    pub async fn add_evidence(
        &self,
        escrow_id: u64,
        evidence: &str,
    ) -> Result<TransactionMirror, LedgerError> {
        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        if mirror.status != EscrowStatus::Disputed {
            return Err(LedgerError::Validation(format!(
                "escrow {escrow_id} is not disputed"
            )));
        }
        self.submit_evidence(&mut mirror, evidence).await?;
        Ok(mirror)
    }

    /// Settle a dispute. On-chain the escrow reads `Completed` when the
    /// seller wins and `Cancelled` when the buyer wins.
    pub async fn resolve_dispute(
        &self,
        escrow_id: u64,
        winner: Winner,
    ) -> Result<TransactionMirror, LedgerError> {
        let _guard = self.lock(escrow_id).await;

        let mut mirror = self.load(escrow_id)?;
        ensure_transition(&mirror, EscrowStatus::Resolved)?;

        let outcome = self.chain.resolve_dispute(escrow_id, winner).await?;
        let winner_label = match winner {
            Winner::Buyer => "buyer",
            Winner::Seller => "seller",
        };
        mirror.advance(
            EscrowStatus::Resolved,
            format!("Dispute resolved in favor of {winner_label}"),
            self.actor(),
            Some(outcome.tx_hash),
        );
        let now = Utc::now();
        let dispute = mirror.dispute.get_or_insert_with(|| DisputeRecord {
            reason: String::new(),
            evidence: Vec::new(),
            arbitrator: None,
            resolution: None,
            created_at: now,
            resolved_at: None,
        });
        dispute.resolution = Some(winner);
        dispute.resolved_at = Some(now);
        self.persist(&mirror, &outcome)?;

        info!(escrow_id, winner = winner_label, tx_hash = %outcome.tx_hash, "Dispute resolved");
        Ok(mirror)
    }

    // =========================================================================
    // Reads and Reconciliation
    // =========================================================================

    /// Read the authoritative record and reconcile the mirror toward it.
    pub async fn get_escrow(&self, escrow_id: u64) -> Result<EscrowSnapshot, LedgerError> {
        // Read under the lock so a concurrent write cannot land between the
        // chain read and the mirror update.
        let _guard = self.lock(escrow_id).await;

        let record = self.chain.get_escrow(escrow_id).await?;
        let milestones = self.chain.get_milestones(escrow_id).await?;

        let mirror = match self.store.get_by_escrow_id(escrow_id)? {
            Some(mut mirror) => {
                let dispute = if needs_dispute_read(&record, &mirror) {
                    self.chain.get_dispute(escrow_id).await?
                } else {
                    None
                };
                let before = mirror.status;
                if reconcile_mirror(&mut mirror, &record, &milestones, dispute.as_ref()) {
                    self.store.update_mirror(&mirror)?;
                    info!(
                        escrow_id,
                        from = ?before,
                        to = ?mirror.status,
                        "Mirror reconciled from chain"
                    );
                }
                Some(mirror)
            }
            None => None,
        };

        Ok(EscrowSnapshot {
            record,
            milestones,
            mirror,
        })
    }

    /// Reconcile one mirror. Returns the mirror after reconciliation.
    pub async fn reconcile(&self, escrow_id: u64) -> Result<TransactionMirror, LedgerError> {
        self.get_escrow(escrow_id)
            .await?
            .mirror
            .ok_or(LedgerError::NotFound(escrow_id))
    }

    /// Local mirror, without touching the chain.
    pub fn mirror(&self, escrow_id: u64) -> Result<Option<TransactionMirror>, LedgerError> {
        Ok(self.store.get_by_escrow_id(escrow_id)?)
    }

    /// Escrow ids whose mirror is not yet terminal.
    pub fn open_escrow_ids(&self) -> Result<Vec<u64>, LedgerError> {
        Ok(self.store.list_open_escrow_ids()?)
    }

    /// Whether the on-chain `metadataHash` matches the mirror's metadata.
    pub async fn verify_metadata(&self, escrow_id: u64) -> Result<bool, LedgerError> {
        let mirror = self.load(escrow_id)?;
        let record = self.chain.get_escrow(escrow_id).await?;
        let local = mirror
            .metadata
            .content_hash()
            .map_err(|e| LedgerError::Validation(format!("metadata not serializable: {e}")))?;

        let matches = local == record.metadata_hash;
        if !matches {
            warn!(
                escrow_id,
                on_chain = %record.metadata_hash,
                local = %local,
                "Escrow metadata hash mismatch"
            );
        }
        Ok(matches)
    }

    /// Success and dispute rates over every mirror where `seller` sold.
    pub fn seller_reputation(&self, seller: Address) -> Result<SellerReputation, LedgerError> {
        let mirrors = self.store.list_by_seller(&seller.to_string())?;
        let total = mirrors.len() as u64;
        if total == 0 {
            return Ok(SellerReputation {
                total_transactions: 0,
                success_rate: 0.0,
                dispute_rate: 0.0,
            });
        }

        let successes = mirrors
            .iter()
            .filter(|m| match m.status {
                EscrowStatus::Completed => true,
                EscrowStatus::Resolved => {
                    m.dispute.as_ref().and_then(|d| d.resolution) == Some(Winner::Seller)
                }
                _ => false,
            })
            .count();
        let disputes = mirrors.iter().filter(|m| m.dispute.is_some()).count();

        Ok(SellerReputation {
            total_transactions: total,
            success_rate: successes as f64 / total as f64,
            dispute_rate: disputes as f64 / total as f64,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn lock(&self, escrow_id: u64) -> EscrowGuard {
        let mutex = Arc::clone(self.locks.entry(escrow_id).or_default().value());
        EscrowGuard {
            escrow_id,
            locks: Arc::clone(&self.locks),
            guard: Some(mutex.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn load(&self, escrow_id: u64) -> Result<TransactionMirror, LedgerError> {
        self.store
            .get_by_escrow_id(escrow_id)?
            .ok_or(LedgerError::NotFound(escrow_id))
    }

    fn actor(&self) -> String {
        self.chain
            .signer_address()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "engine".to_string())
    }

    fn persist(
        &self,
        mirror: &TransactionMirror,
        outcome: &TransactionOutcome,
    ) -> Result<(), LedgerError> {
        self.store.update_mirror(mirror).map_err(|source| {
            error!(
                escrow_id = mirror.escrow_id,
                tx_hash = %outcome.tx_hash,
                error = %source,
                "Chain write succeeded but mirror update failed; reconciliation will repair it"
            );
            LedgerError::Storage(source)
        })
    }

    async fn submit_evidence(
        &self,
        mirror: &mut TransactionMirror,
        evidence: &str,
    ) -> Result<(), LedgerError> {
        if evidence.trim().is_empty() {
            return Err(LedgerError::Validation("evidence must not be empty".into()));
        }
        let outcome = self.chain.add_evidence(mirror.escrow_id, evidence).await?;
        if let Some(dispute) = mirror.dispute.as_mut() {
            dispute.evidence.push(evidence.to_string());
        }
        mirror.note("Evidence submitted", self.actor(), Some(outcome.tx_hash));
        self.persist(mirror, &outcome)
    }
}

fn parse_amount(amount: &str, decimals: u8) -> Result<U256, LedgerError> {
    let value = parse_units(amount, decimals).map_err(|e| LedgerError::Validation(e.to_string()))?;
    if value.is_zero() {
        return Err(LedgerError::Validation("amount must be positive".into()));
    }
    Ok(value)
}

fn ensure_transition(mirror: &TransactionMirror, to: EscrowStatus) -> Result<(), LedgerError> {
    if mirror.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            escrow_id: mirror.escrow_id,
            from: mirror.status,
            to,
        })
    }
}

fn needs_dispute_read(record: &EscrowRecord, mirror: &TransactionMirror) -> bool {
    matches!(
        record.status,
        EscrowStatus::Disputed | EscrowStatus::Completed | EscrowStatus::Cancelled
    ) || mirror.status == EscrowStatus::Disputed
        || mirror.dispute.is_some()
}

fn from_unix(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

/// Bring `mirror` in line with the chain. Returns whether anything changed.
///
/// Skipped intermediate states are filled in as synthesized timeline
/// entries. A mirror that cannot legally reach the chain status is
/// overwritten outright.
pub fn reconcile_mirror(
    mirror: &mut TransactionMirror,
    record: &EscrowRecord,
    milestones: &[Milestone],
    dispute: Option<&OnChainDispute>,
) -> bool {
    let mut changed = false;

    for (index, milestone) in milestones.iter().enumerate() {
        let index = index as u64;
        if milestone.completed && !mirror.released_milestones.contains(&index) {
            mirror.released_milestones.push(index);
            changed = true;
        }
    }

    if let Some(onchain) = dispute {
        let local = mirror.dispute.get_or_insert_with(|| {
            changed = true;
            DisputeRecord {
                reason: onchain.reason.clone(),
                evidence: Vec::new(),
                arbitrator: None,
                resolution: None,
                created_at: from_unix(onchain.created_at),
                resolved_at: None,
            }
        });
        if onchain.arbitrator != Address::ZERO {
            let arbitrator = Some(onchain.arbitrator.to_string());
            if local.arbitrator != arbitrator {
                local.arbitrator = arbitrator;
                changed = true;
            }
        }
        if onchain.resolution.is_some() && local.resolution != onchain.resolution {
            local.resolution = onchain.resolution;
            local.resolved_at = Some(from_unix(onchain.resolved_at));
            changed = true;
        }
    }

    // A dispute settled on-chain reads as Completed/Cancelled.
    if mirror.status == EscrowStatus::Disputed {
        let inferred = match record.status {
            EscrowStatus::Completed => Some(Winner::Seller),
            EscrowStatus::Cancelled => Some(Winner::Buyer),
            _ => None,
        };
        if let (Some(winner), Some(local)) = (inferred, mirror.dispute.as_mut()) {
            if local.resolution.is_none() {
                local.resolution = Some(winner);
                local.resolved_at = Some(Utc::now());
                changed = true;
            }
        }
    }

    let resolution = mirror.dispute.as_ref().and_then(|d| d.resolution);
    if mirror.status.agrees_with_chain(record.status, resolution) {
        return changed;
    }

    let settled_by_dispute = resolution.is_some_and(|w| w.chain_outcome() == record.status);
    let target = if settled_by_dispute {
        EscrowStatus::Resolved
    } else {
        record.status
    };

    match mirror.status.path_to(target) {
        Some(path) => {
            for step in path {
                mirror.advance(
                    step,
                    format!("Reconciled from chain: {step:?}"),
                    RECONCILIATION_ACTOR,
                    None,
                );
            }
        }
        None => {
            warn!(
                escrow_id = mirror.escrow_id,
                mirror_status = ?mirror.status,
                chain_status = ?record.status,
                "Mirror contradicts chain; overwriting"
            );
            let previous = mirror.status;
            mirror.status = target;
            mirror.note(
                format!("Mirror overwritten from chain (was {previous:?})"),
                RECONCILIATION_ACTOR,
                None,
            );
        }
    }

    if mirror.status == EscrowStatus::Completed {
        for index in 0..mirror.milestone_count() {
            if !mirror.released_milestones.contains(&index) {
                mirror.released_milestones.push(index);
            }
        }
    }
    true
}
