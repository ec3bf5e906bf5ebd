// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory [`EscrowChain`] that behaves like the deployed contracts.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, Log, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;

use super::contract::{CreateEscrowCall, EscrowChain, EscrowCreated};
use super::types::{EscrowRecord, EscrowStatus, Milestone, OnChainDispute, Winner};
use crate::blockchain::gateway::{GatewayError, TransactionOutcome};

pub(crate) fn escrow_address() -> Address {
    Address::repeat_byte(0xe5)
}

pub(crate) fn buyer() -> Address {
    Address::repeat_byte(0x11)
}

pub(crate) fn seller() -> Address {
    Address::repeat_byte(0x22)
}

/// What the `createEscrow` receipt looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CreationReceipt {
    #[default]
    WithEvent,
    WithoutEvent,
    ZeroId,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    tx_counter: u64,
    records: HashMap<u64, EscrowRecord>,
    milestones: HashMap<u64, Vec<Milestone>>,
    disputes: HashMap<u64, OnChainDispute>,
    evidence: HashMap<u64, Vec<String>>,
    calls: Vec<String>,
    failing: Vec<&'static str>,
    unsupported: Vec<Address>,
    receipt: CreationReceipt,
}

pub(crate) struct FakeChain {
    signer: Option<Address>,
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub(crate) fn new() -> Self {
        Self {
            signer: Some(buyer()),
            state: Mutex::new(FakeState {
                next_id: 42,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn without_signer() -> Self {
        Self {
            signer: None,
            ..Self::new()
        }
    }

    /// Make every call to `method` revert.
    pub(crate) fn fail_on(&self, method: &'static str) {
        self.state.lock().unwrap().failing.push(method);
    }

    pub(crate) fn creation_receipt(&self, receipt: CreationReceipt) {
        self.state.lock().unwrap().receipt = receipt;
    }

    pub(crate) fn unsupport(&self, token: Address) {
        self.state.lock().unwrap().unsupported.push(token);
    }

    /// Mutate on-chain status behind the mirror's back.
    pub(crate) fn set_status(&self, escrow_id: u64, status: EscrowStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.get_mut(&escrow_id) {
            record.status = status;
        }
    }

    /// Open and settle a dispute directly on-chain.
    pub(crate) fn settle_dispute(&self, escrow_id: u64, winner: Winner) {
        let mut state = self.state.lock().unwrap();
        state.disputes.insert(
            escrow_id,
            OnChainDispute {
                escrow_id,
                initiator: buyer(),
                reason: "Settled out of band".to_string(),
                arbitrator: Address::repeat_byte(0x33),
                resolution: Some(winner),
                created_at: 1_700_000_000,
                resolved_at: 1_700_000_500,
            },
        );
        if let Some(record) = state.records.get_mut(&escrow_id) {
            record.status = winner.chain_outcome();
        }
    }

    pub(crate) fn complete_milestone(&self, escrow_id: u64, index: usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state
            .milestones
            .get_mut(&escrow_id)
            .and_then(|ms| ms.get_mut(index))
        {
            m.completed = true;
            m.completed_at = 1_700_000_100;
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn status_of(&self, escrow_id: u64) -> Option<EscrowStatus> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&escrow_id)
            .map(|r| r.status)
    }

    pub(crate) fn evidence_of(&self, escrow_id: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .evidence
            .get(&escrow_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the call, then apply `effect` unless the method is set to fail.
    fn write(
        &self,
        method: &'static str,
        effect: impl FnOnce(&mut FakeState) -> Result<Vec<Log>, ()>,
    ) -> Result<TransactionOutcome, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());
        state.tx_counter += 1;
        let tx_hash = B256::left_padding_from(&state.tx_counter.to_be_bytes());

        if state.failing.contains(&method) {
            return Err(GatewayError::Reverted {
                method: method.to_string(),
                tx_hash,
            });
        }
        let logs = effect(&mut state).map_err(|_| GatewayError::Reverted {
            method: method.to_string(),
            tx_hash,
        })?;

        Ok(TransactionOutcome {
            tx_hash,
            block_number: Some(state.tx_counter),
            logs,
        })
    }
}

fn transition(
    state: &mut FakeState,
    escrow_id: u64,
    from: &[EscrowStatus],
    to: EscrowStatus,
) -> Result<Vec<Log>, ()> {
    let record = state.records.get_mut(&escrow_id).ok_or(())?;
    if !from.contains(&record.status) {
        return Err(());
    }
    record.status = to;
    Ok(Vec::new())
}

#[async_trait]
impl EscrowChain for FakeChain {
    fn escrow_address(&self) -> Address {
        escrow_address()
    }

    fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    fn chain_id(&self) -> u64 {
        43113
    }

    async fn create_escrow(
        &self,
        call: CreateEscrowCall,
    ) -> Result<TransactionOutcome, GatewayError> {
        let buyer = self.signer.unwrap_or_default();
        self.write("createEscrow", |state| {
            let id = state.next_id;
            state.next_id += 1;
            state.records.insert(
                id,
                EscrowRecord {
                    id,
                    buyer,
                    seller: call.seller,
                    amount: call.amount,
                    platform_fee: call.amount / U256::from(100u64),
                    created_at: 1_700_000_000,
                    expires_at: 1_702_592_000,
                    status: EscrowStatus::Created,
                    description: call.description.clone(),
                    metadata_hash: call.metadata_hash,
                    token: call.token,
                },
            );
            let milestones = call
                .milestone_amounts
                .iter()
                .zip(&call.milestone_descriptions)
                .map(|(amount, description)| Milestone {
                    amount: *amount,
                    description: description.clone(),
                    completed: false,
                    completed_at: 0,
                })
                .collect();
            state.milestones.insert(id, milestones);

            let emitted_id = match state.receipt {
                CreationReceipt::WithoutEvent => return Ok(Vec::new()),
                CreationReceipt::ZeroId => 0,
                CreationReceipt::WithEvent => id,
            };
            let event = EscrowCreated {
                escrowId: U256::from(emitted_id),
                buyer,
                seller: call.seller,
                amount: call.amount,
            };
            Ok(vec![Log {
                address: escrow_address(),
                data: event.encode_log_data(),
            }])
        })
    }

    async fn fund_escrow(
        &self,
        escrow_id: u64,
        _token: Address,
        _amount: U256,
    ) -> Result<TransactionOutcome, GatewayError> {
        self.write("fundEscrow", |state| {
            transition(state, escrow_id, &[EscrowStatus::Created], EscrowStatus::Funded)
        })
    }

    async fn release_payment(
        &self,
        escrow_id: u64,
        milestone_index: u64,
    ) -> Result<TransactionOutcome, GatewayError> {
        self.write("releasePayment", |state| {
            let status = state.records.get(&escrow_id).ok_or(())?.status;
            if status != EscrowStatus::Funded {
                return Err(());
            }
            let milestones = state.milestones.entry(escrow_id).or_default();
            let done = if milestones.is_empty() {
                milestone_index == 0
            } else {
                let m = milestones.get_mut(milestone_index as usize).ok_or(())?;
                if m.completed {
                    return Err(());
                }
                m.completed = true;
                m.completed_at = 1_700_000_100;
                milestones.iter().all(|m| m.completed)
            };
            if done {
                transition(state, escrow_id, &[EscrowStatus::Funded], EscrowStatus::Completed)?;
            }
            Ok(Vec::new())
        })
    }

    async fn cancel_escrow(&self, escrow_id: u64) -> Result<TransactionOutcome, GatewayError> {
        self.write("cancelEscrow", |state| {
            transition(
                state,
                escrow_id,
                &[EscrowStatus::Created, EscrowStatus::Funded],
                EscrowStatus::Cancelled,
            )
        })
    }

    async fn file_dispute(
        &self,
        escrow_id: u64,
        reason: &str,
    ) -> Result<TransactionOutcome, GatewayError> {
        let buyer = self.signer.unwrap_or_default();
        self.write("fileDispute", |state| {
            transition(state, escrow_id, &[EscrowStatus::Funded], EscrowStatus::Disputed)?;
            state.disputes.insert(
                escrow_id,
                OnChainDispute {
                    escrow_id,
                    initiator: buyer,
                    reason: reason.to_string(),
                    arbitrator: Address::ZERO,
                    resolution: None,
                    created_at: 1_700_000_200,
                    resolved_at: 0,
                },
            );
            Ok(Vec::new())
        })
    }

    async fn add_evidence(
        &self,
        escrow_id: u64,
        evidence: &str,
    ) -> Result<TransactionOutcome, GatewayError> {
        self.write("addEvidence", |state| {
            if !state.disputes.contains_key(&escrow_id) {
                return Err(());
            }
            state
                .evidence
                .entry(escrow_id)
                .or_default()
                .push(evidence.to_string());
            Ok(Vec::new())
        })
    }

    async fn resolve_dispute(
        &self,
        escrow_id: u64,
        winner: Winner,
    ) -> Result<TransactionOutcome, GatewayError> {
        self.write("resolveDispute", |state| {
            transition(
                state,
                escrow_id,
                &[EscrowStatus::Disputed],
                winner.chain_outcome(),
            )?;
            let dispute = state.disputes.get_mut(&escrow_id).ok_or(())?;
            dispute.resolution = Some(winner);
            dispute.resolved_at = 1_700_000_900;
            Ok(Vec::new())
        })
    }

    async fn get_escrow(&self, escrow_id: u64) -> Result<EscrowRecord, GatewayError> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(&escrow_id)
            .cloned()
            .ok_or_else(|| GatewayError::decode("getEscrow", "no such escrow"))
    }

    async fn get_milestones(&self, escrow_id: u64) -> Result<Vec<Milestone>, GatewayError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .milestones
            .get(&escrow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_dispute(&self, escrow_id: u64) -> Result<Option<OnChainDispute>, GatewayError> {
        Ok(self.state.lock().unwrap().disputes.get(&escrow_id).cloned())
    }

    async fn is_supported_token(&self, token: Address) -> Result<bool, GatewayError> {
        Ok(!self.state.lock().unwrap().unsupported.contains(&token))
    }
}
