// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow domain types: on-chain records and the off-chain mirror.

use std::collections::VecDeque;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Status State Machine
// =============================================================================

/// Escrow lifecycle status.
///
/// ```text
/// CREATED ─┬─> FUNDED ─┬─> COMPLETED
///          │           ├─> DISPUTED ──> RESOLVED
///          │           ├─> CANCELLED
///          │           └─> EXPIRED
///          └─> CANCELLED
/// ```
///
/// `Resolved` only exists on the mirror; on-chain a resolved dispute reads
/// as `Completed` (seller won) or `Cancelled` (buyer won).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Created,
    Funded,
    Completed,
    Disputed,
    Cancelled,
    Expired,
    Resolved,
}

impl EscrowStatus {
    /// Decode the contract's `uint8` status.
    pub fn from_chain_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Funded),
            2 => Some(Self::Completed),
            3 => Some(Self::Disputed),
            4 => Some(Self::Cancelled),
            5 => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn allowed_next(self) -> &'static [EscrowStatus] {
        use EscrowStatus::*;
        match self {
            Created => &[Funded, Cancelled],
            Funded => &[Completed, Disputed, Cancelled, Expired],
            Disputed => &[Resolved],
            Completed | Cancelled | Expired | Resolved => &[],
        }
    }

    pub fn can_transition_to(self, next: EscrowStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Shortest legal path from `self` to `target`, excluding `self`.
    ///
    /// Returns `Some(vec![])` when already there, `None` when unreachable.
    pub fn path_to(self, target: EscrowStatus) -> Option<Vec<EscrowStatus>> {
        if self == target {
            return Some(Vec::new());
        }

        let mut queue = VecDeque::from([(self, Vec::new())]);
        let mut seen = vec![self];
        while let Some((status, path)) = queue.pop_front() {
            for &next in status.allowed_next() {
                if seen.contains(&next) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(next);
                if next == target {
                    return Some(next_path);
                }
                seen.push(next);
                queue.push_back((next, next_path));
            }
        }
        None
    }

    /// Whether a mirror in `self` agrees with a freshly read chain status.
    pub fn agrees_with_chain(self, chain: EscrowStatus, resolution: Option<Winner>) -> bool {
        match (self, resolution) {
            (EscrowStatus::Resolved, Some(winner)) => winner.chain_outcome() == chain,
            _ => self == chain,
        }
    }
}

/// Dispute winner as encoded by the dispute contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Buyer,
    Seller,
}

impl Winner {
    pub fn chain_code(self) -> u8 {
        match self {
            Winner::Buyer => 1,
            Winner::Seller => 2,
        }
    }

    /// `0` means unresolved.
    pub fn from_chain_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Winner::Buyer),
            2 => Some(Winner::Seller),
            _ => None,
        }
    }

    /// Escrow status the contract settles on after resolution.
    pub fn chain_outcome(self) -> EscrowStatus {
        match self {
            Winner::Buyer => EscrowStatus::Cancelled,
            Winner::Seller => EscrowStatus::Completed,
        }
    }
}

// =============================================================================
// On-chain Records
// =============================================================================

/// Authoritative escrow record as returned by `getEscrow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: u64,
    pub buyer: Address,
    pub seller: Address,
    pub amount: U256,
    pub platform_fee: U256,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: EscrowStatus,
    pub description: String,
    pub metadata_hash: B256,
    pub token: Address,
}

/// One releasable tranche of an escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub amount: U256,
    pub description: String,
    pub completed: bool,
    /// Unix seconds, `0` while open.
    pub completed_at: u64,
}

/// Dispute as recorded by the dispute contract (`disputes(id)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainDispute {
    pub escrow_id: u64,
    pub initiator: Address,
    pub reason: String,
    pub arbitrator: Address,
    pub resolution: Option<Winner>,
    pub created_at: u64,
    pub resolved_at: u64,
}

// =============================================================================
// Requests
// =============================================================================

/// Milestone as supplied by the buyer at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    /// Decimal amount in token units (e.g. "0.5").
    pub amount: String,
    pub description: String,
}

/// Input to `EscrowLedger::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    pub seller: Address,
    pub description: String,
    #[serde(default)]
    pub milestones: Vec<MilestoneSpec>,
    /// `Address::ZERO` for the native currency.
    pub token: Address,
    /// Decimal amount in token units (e.g. "1.5").
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_email: Option<String>,
}

/// Content hashed into `metadataHash` and kept on the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowMetadata {
    pub description: String,
    pub milestones: Vec<MilestoneSpec>,
    pub token: Address,
    pub amount: String,
}

impl EscrowMetadata {
    /// keccak256 of the canonical JSON encoding.
    pub fn content_hash(&self) -> Result<B256, serde_json::Error> {
        Ok(alloy::primitives::keccak256(serde_json::to_vec(self)?))
    }
}

// =============================================================================
// Off-chain Mirror
// =============================================================================

/// One step in the mirror's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: EscrowStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Signer address, or `"chain-reconciliation"` for synthesized entries.
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Off-chain view of a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbitrator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Winner>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Best-effort local replica of an on-chain escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMirror {
    pub transaction_id: String,
    pub escrow_id: u64,
    pub buyer: String,
    pub seller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_email: Option<String>,
    /// Decimal amount in token units.
    pub amount: String,
    /// Token symbol (`UNKNOWN` for unregistered tokens).
    pub currency: String,
    pub status: EscrowStatus,
    pub metadata: EscrowMetadata,
    /// Indices of milestones released so far.
    #[serde(default)]
    pub released_milestones: Vec<u64>,
    pub timeline: Vec<TimelineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute: Option<DisputeRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionMirror {
    /// Mirror for a freshly created escrow, with its first timeline entry.
    pub fn new_created(
        escrow_id: u64,
        buyer: Address,
        request: &CreateEscrowRequest,
        currency: &str,
        metadata: EscrowMetadata,
        tx_hash: B256,
    ) -> Self {
        let now = Utc::now();
        let actor = buyer.to_string();
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            escrow_id,
            buyer: actor.clone(),
            seller: request.seller.to_string(),
            buyer_email: request.buyer_email.clone(),
            seller_email: request.seller_email.clone(),
            amount: request.amount.clone(),
            currency: currency.to_string(),
            status: EscrowStatus::Created,
            metadata,
            released_milestones: Vec::new(),
            timeline: vec![TimelineEntry {
                status: EscrowStatus::Created,
                timestamp: now,
                description: "Escrow created on-chain".to_string(),
                actor,
                tx_hash: Some(tx_hash.to_string()),
            }],
            dispute: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, appending a timeline entry.
    ///
    /// Returns `false` (and changes nothing) if the transition is illegal.
    pub fn advance(
        &mut self,
        next: EscrowStatus,
        description: impl Into<String>,
        actor: impl Into<String>,
        tx_hash: Option<B256>,
    ) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        self.status = next;
        self.timeline.push(TimelineEntry {
            status: next,
            timestamp: now,
            description: description.into(),
            actor: actor.into(),
            tx_hash: tx_hash.map(|h| h.to_string()),
        });
        self.updated_at = now;
        true
    }

    /// Append a timeline entry without changing status.
    pub fn note(
        &mut self,
        description: impl Into<String>,
        actor: impl Into<String>,
        tx_hash: Option<B256>,
    ) {
        let now = Utc::now();
        self.timeline.push(TimelineEntry {
            status: self.status,
            timestamp: now,
            description: description.into(),
            actor: actor.into(),
            tx_hash: tx_hash.map(|h| h.to_string()),
        });
        self.updated_at = now;
    }

    /// Number of milestones, treating a milestone-less escrow as one tranche.
    pub fn milestone_count(&self) -> u64 {
        self.metadata.milestones.len().max(1) as u64
    }

    pub fn all_milestones_released(&self) -> bool {
        (0..self.milestone_count()).all(|i| self.released_milestones.contains(&i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EscrowStatus::*;

    fn request() -> CreateEscrowRequest {
        CreateEscrowRequest {
            seller: Address::repeat_byte(0x22),
            description: "Logo design".to_string(),
            milestones: vec![],
            token: Address::ZERO,
            amount: "1.5".to_string(),
            buyer_email: Some("buyer@example.com".to_string()),
            seller_email: None,
        }
    }

    fn metadata() -> EscrowMetadata {
        EscrowMetadata {
            description: "Logo design".to_string(),
            milestones: vec![],
            token: Address::ZERO,
            amount: "1.5".to_string(),
        }
    }

    #[test]
    fn transitions_follow_lifecycle() {
        assert!(Created.can_transition_to(Funded));
        assert!(Created.can_transition_to(Cancelled));
        assert!(!Created.can_transition_to(Completed));
        assert!(!Created.can_transition_to(Disputed));
        assert!(Funded.can_transition_to(Expired));
        assert!(Disputed.can_transition_to(Resolved));
        assert!(!Disputed.can_transition_to(Completed));
        for terminal in [Completed, Cancelled, Expired, Resolved] {
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn path_to_never_skips_intermediate_states() {
        assert_eq!(Created.path_to(Completed), Some(vec![Funded, Completed]));
        assert_eq!(Created.path_to(Resolved), Some(vec![Funded, Disputed, Resolved]));
        assert_eq!(Created.path_to(Cancelled), Some(vec![Cancelled]));
        assert_eq!(Funded.path_to(Funded), Some(vec![]));
        assert_eq!(Completed.path_to(Funded), None);
        assert_eq!(Disputed.path_to(Completed), None);
    }

    #[test]
    fn chain_codes() {
        assert_eq!(EscrowStatus::from_chain_code(0), Some(Created));
        assert_eq!(EscrowStatus::from_chain_code(5), Some(Expired));
        assert_eq!(EscrowStatus::from_chain_code(6), None);
        assert_eq!(Winner::from_chain_code(0), None);
        assert_eq!(Winner::from_chain_code(Winner::Seller.chain_code()), Some(Winner::Seller));
    }

    #[test]
    fn resolved_mirror_agrees_with_settled_chain_status() {
        assert!(Resolved.agrees_with_chain(Completed, Some(Winner::Seller)));
        assert!(Resolved.agrees_with_chain(Cancelled, Some(Winner::Buyer)));
        assert!(!Resolved.agrees_with_chain(Completed, Some(Winner::Buyer)));
        assert!(Funded.agrees_with_chain(Funded, None));
        assert!(!Funded.agrees_with_chain(Disputed, None));
    }

    #[test]
    fn new_mirror_starts_created_with_one_entry() {
        let buyer = Address::repeat_byte(0x11);
        let mirror = TransactionMirror::new_created(42, buyer, &request(), "AVAX", metadata(), B256::ZERO);
        assert_eq!(mirror.escrow_id, 42);
        assert_eq!(mirror.status, Created);
        assert_eq!(mirror.timeline.len(), 1);
        assert_eq!(mirror.timeline[0].status, Created);
        assert_eq!(mirror.currency, "AVAX");
        assert!(Uuid::parse_str(&mirror.transaction_id).is_ok());
    }

    #[test]
    fn advance_rejects_illegal_transition() {
        let mut mirror =
            TransactionMirror::new_created(1, Address::ZERO, &request(), "AVAX", metadata(), B256::ZERO);
        assert!(!mirror.advance(Completed, "skip", "test", None));
        assert_eq!(mirror.status, Created);
        assert_eq!(mirror.timeline.len(), 1);

        assert!(mirror.advance(Funded, "funded", "test", None));
        assert!(mirror.advance(Disputed, "disputed", "test", None));
        assert_eq!(mirror.timeline.len(), 3);
    }

    #[test]
    fn single_tranche_escrow_counts_as_one_milestone() {
        let mut mirror =
            TransactionMirror::new_created(1, Address::ZERO, &request(), "AVAX", metadata(), B256::ZERO);
        assert_eq!(mirror.milestone_count(), 1);
        assert!(!mirror.all_milestones_released());
        mirror.released_milestones.push(0);
        assert!(mirror.all_milestones_released());
    }

    #[test]
    fn metadata_hash_is_content_addressed() {
        let a = metadata().content_hash().unwrap();
        let mut changed = metadata();
        changed.amount = "2".to_string();
        assert_eq!(a, metadata().content_hash().unwrap());
        assert_ne!(a, changed.content_hash().unwrap());
    }

    #[test]
    fn mirror_serializes_status_lowercase() {
        let mirror =
            TransactionMirror::new_created(7, Address::ZERO, &request(), "AVAX", metadata(), B256::ZERO);
        let json = serde_json::to_value(&mirror).unwrap();
        assert_eq!(json["status"], "created");
        assert!(json.get("dispute").is_none());
        let back: TransactionMirror = serde_json::from_value(json).unwrap();
        assert_eq!(back, mirror);
    }
}
