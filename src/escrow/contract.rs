// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow and dispute contract bindings.
//!
//! Dynamic view results are decoded into [`EscrowRecord`], [`Milestone`] and
//! [`OnChainDispute`] here, so nothing above this module handles raw tuples.

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Log, B256, U256},
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;

use super::types::{EscrowRecord, EscrowStatus, Milestone, OnChainDispute, Winner};
use crate::blockchain::{
    erc20,
    gateway::{parse_abi, ContractGateway, GatewayError, TransactionOutcome},
    ChainConnector, NATIVE_TOKEN,
};

/// Escrow contract surface.
pub const ESCROW_ABI: &[&str] = &[
    "function createEscrow(address seller, address token, uint256 amount, string description, bytes32 metadataHash, uint256[] milestoneAmounts, string[] milestoneDescriptions) returns (uint256)",
    "function fundEscrow(uint256 escrowId) payable",
    "function releasePayment(uint256 escrowId, uint256 milestoneIndex)",
    "function fileDispute(uint256 escrowId, string reason)",
    "function cancelEscrow(uint256 escrowId)",
    "function getEscrow(uint256 escrowId) view returns (uint256 id, address buyer, address seller, uint256 amount, uint256 platformFee, uint256 createdAt, uint256 expiresAt, uint8 status, string description, bytes32 metadataHash, address token)",
    "function getMilestones(uint256 escrowId) view returns ((uint256,string,bool,uint256)[])",
    "function supportedTokens(address token) view returns (bool)",
    "event EscrowCreated(uint256 indexed escrowId, address indexed buyer, address indexed seller, uint256 amount)",
];

/// Dispute contract surface. Disputes are opened through the escrow
/// contract's `fileDispute`, so `openDispute` is not bound.
pub const DISPUTE_ABI: &[&str] = &[
    "function addEvidence(uint256 escrowId, string evidence)",
    "function resolveDispute(uint256 escrowId, uint8 winner)",
    "function disputes(uint256 escrowId) view returns (uint256 escrowId, address initiator, string reason, address arbitrator, uint8 resolution, uint256 createdAt, uint256 resolvedAt)",
];

sol! {
    #[derive(Debug)]
    event EscrowCreated(uint256 indexed escrowId, address indexed buyer, address indexed seller, uint256 amount);
}

/// Arguments of `createEscrow`, already converted to chain units.
#[derive(Debug, Clone)]
pub struct CreateEscrowCall {
    pub seller: Address,
    pub token: Address,
    pub amount: U256,
    pub description: String,
    pub metadata_hash: B256,
    pub milestone_amounts: Vec<U256>,
    pub milestone_descriptions: Vec<String>,
}

/// Typed access to the escrow and dispute contracts.
///
/// Writes resolve once the receipt is mined; a reverted receipt is an error.
#[async_trait]
pub trait EscrowChain: Send + Sync {
    /// Address that emits `EscrowCreated`.
    fn escrow_address(&self) -> Address;

    /// Address that signs writes, if any.
    fn signer_address(&self) -> Option<Address>;

    fn chain_id(&self) -> u64;

    async fn create_escrow(&self, call: CreateEscrowCall)
        -> Result<TransactionOutcome, GatewayError>;

    async fn fund_escrow(
        &self,
        escrow_id: u64,
        token: Address,
        amount: U256,
    ) -> Result<TransactionOutcome, GatewayError>;

    async fn release_payment(
        &self,
        escrow_id: u64,
        milestone_index: u64,
    ) -> Result<TransactionOutcome, GatewayError>;

    async fn cancel_escrow(&self, escrow_id: u64) -> Result<TransactionOutcome, GatewayError>;

    async fn file_dispute(
        &self,
        escrow_id: u64,
        reason: &str,
    ) -> Result<TransactionOutcome, GatewayError>;

    async fn add_evidence(
        &self,
        escrow_id: u64,
        evidence: &str,
    ) -> Result<TransactionOutcome, GatewayError>;

    async fn resolve_dispute(
        &self,
        escrow_id: u64,
        winner: Winner,
    ) -> Result<TransactionOutcome, GatewayError>;

    async fn get_escrow(&self, escrow_id: u64) -> Result<EscrowRecord, GatewayError>;

    async fn get_milestones(&self, escrow_id: u64) -> Result<Vec<Milestone>, GatewayError>;

    /// `None` when no dispute was ever opened.
    async fn get_dispute(&self, escrow_id: u64) -> Result<Option<OnChainDispute>, GatewayError>;

    async fn is_supported_token(&self, token: Address) -> Result<bool, GatewayError>;
}

/// [`EscrowChain`] over two [`ContractGateway`]s.
#[derive(Clone)]
pub struct EscrowContracts {
    escrow: ContractGateway,
    dispute: ContractGateway,
}

impl EscrowContracts {
    pub fn new(
        connector: Arc<ChainConnector>,
        escrow_address: Address,
        dispute_address: Address,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            escrow: ContractGateway::new(
                "escrow",
                escrow_address,
                parse_abi(ESCROW_ABI)?,
                Arc::clone(&connector),
            ),
            dispute: ContractGateway::new(
                "dispute",
                dispute_address,
                parse_abi(DISPUTE_ABI)?,
                connector,
            ),
        })
    }

    /// Same contracts, signed by another connector.
    pub fn with_connector(&self, connector: Arc<ChainConnector>) -> Self {
        Self {
            escrow: self.escrow.with_connector(Arc::clone(&connector)),
            dispute: self.dispute.with_connector(connector),
        }
    }

    async fn submit(
        gateway: &ContractGateway,
        method: &str,
        args: &[DynSolValue],
        value: U256,
    ) -> Result<TransactionOutcome, GatewayError> {
        gateway
            .execute_payable(method, args, value)
            .await?
            .wait()
            .await
    }
}

fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

#[async_trait]
impl EscrowChain for EscrowContracts {
    fn escrow_address(&self) -> Address {
        self.escrow.address()
    }

    fn signer_address(&self) -> Option<Address> {
        self.escrow.connector().signer_address()
    }

    fn chain_id(&self) -> u64 {
        self.escrow.connector().chain_id()
    }

    async fn create_escrow(
        &self,
        call: CreateEscrowCall,
    ) -> Result<TransactionOutcome, GatewayError> {
        let args = [
            DynSolValue::Address(call.seller),
            DynSolValue::Address(call.token),
            DynSolValue::Uint(call.amount, 256),
            DynSolValue::String(call.description),
            DynSolValue::FixedBytes(call.metadata_hash, 32),
            DynSolValue::Array(
                call.milestone_amounts
                    .into_iter()
                    .map(|a| DynSolValue::Uint(a, 256))
                    .collect(),
            ),
            DynSolValue::Array(
                call.milestone_descriptions
                    .into_iter()
                    .map(DynSolValue::String)
                    .collect(),
            ),
        ];
        Self::submit(&self.escrow, "createEscrow", &args, U256::ZERO).await
    }

    async fn fund_escrow(
        &self,
        escrow_id: u64,
        token: Address,
        amount: U256,
    ) -> Result<TransactionOutcome, GatewayError> {
        if token == NATIVE_TOKEN {
            return Self::submit(&self.escrow, "fundEscrow", &[uint(escrow_id)], amount).await;
        }

        let owner = self
            .signer_address()
            .ok_or_else(|| GatewayError::MissingSigner {
                method: "fundEscrow".to_string(),
            })?;
        let token_gateway = erc20::erc20_gateway(token, Arc::clone(self.escrow.connector()))?;
        erc20::ensure_allowance(&token_gateway, owner, self.escrow.address(), amount).await?;

        Self::submit(&self.escrow, "fundEscrow", &[uint(escrow_id)], U256::ZERO).await
    }

    async fn release_payment(
        &self,
        escrow_id: u64,
        milestone_index: u64,
    ) -> Result<TransactionOutcome, GatewayError> {
        Self::submit(
            &self.escrow,
            "releasePayment",
            &[uint(escrow_id), uint(milestone_index)],
            U256::ZERO,
        )
        .await
    }

    async fn cancel_escrow(&self, escrow_id: u64) -> Result<TransactionOutcome, GatewayError> {
        Self::submit(&self.escrow, "cancelEscrow", &[uint(escrow_id)], U256::ZERO).await
    }

    async fn file_dispute(
        &self,
        escrow_id: u64,
        reason: &str,
    ) -> Result<TransactionOutcome, GatewayError> {
        Self::submit(
            &self.escrow,
            "fileDispute",
            &[uint(escrow_id), DynSolValue::String(reason.to_string())],
            U256::ZERO,
        )
        .await
    }

    async fn add_evidence(
        &self,
        escrow_id: u64,
        evidence: &str,
    ) -> Result<TransactionOutcome, GatewayError> {
        Self::submit(
            &self.dispute,
            "addEvidence",
            &[uint(escrow_id), DynSolValue::String(evidence.to_string())],
            U256::ZERO,
        )
        .await
    }

    async fn resolve_dispute(
        &self,
        escrow_id: u64,
        winner: Winner,
    ) -> Result<TransactionOutcome, GatewayError> {
        Self::submit(
            &self.dispute,
            "resolveDispute",
            &[
                uint(escrow_id),
                DynSolValue::Uint(U256::from(winner.chain_code()), 8),
            ],
            U256::ZERO,
        )
        .await
    }

    async fn get_escrow(&self, escrow_id: u64) -> Result<EscrowRecord, GatewayError> {
        let output = self.escrow.execute_view("getEscrow", &[uint(escrow_id)]).await?;
        parse_escrow_record(&output)
    }

    async fn get_milestones(&self, escrow_id: u64) -> Result<Vec<Milestone>, GatewayError> {
        let output = self
            .escrow
            .execute_view("getMilestones", &[uint(escrow_id)])
            .await?;
        parse_milestones(&output)
    }

    async fn get_dispute(&self, escrow_id: u64) -> Result<Option<OnChainDispute>, GatewayError> {
        let output = self.dispute.execute_view("disputes", &[uint(escrow_id)]).await?;
        parse_dispute(&output)
    }

    async fn is_supported_token(&self, token: Address) -> Result<bool, GatewayError> {
        let output = self
            .escrow
            .execute_view("supportedTokens", &[DynSolValue::Address(token)])
            .await?;
        output
            .first()
            .and_then(DynSolValue::as_bool)
            .ok_or_else(|| GatewayError::decode("supportedTokens", "expected bool"))
    }
}

// =============================================================================
// Receipt Parsing
// =============================================================================

/// Recover the escrow id from the `EscrowCreated` log emitted by `emitter`.
///
/// # Errors
/// A human-readable reason when the event is absent, cannot be decoded, or
/// carries an id of zero.
pub fn extract_escrow_id(logs: &[Log], emitter: Address) -> Result<u64, String> {
    let event_log = logs
        .iter()
        .filter(|log| log.address == emitter)
        .find(|log| log.data.topics().first() == Some(&EscrowCreated::SIGNATURE_HASH))
        .ok_or_else(|| "receipt contains no EscrowCreated event".to_string())?;

    let event = EscrowCreated::decode_log_data(&event_log.data)
        .map_err(|e| format!("EscrowCreated log could not be decoded: {e}"))?;

    if event.escrowId.is_zero() {
        return Err("EscrowCreated reported escrow id 0".to_string());
    }
    u64::try_from(event.escrowId)
        .map_err(|_| format!("escrow id {} does not fit in u64", event.escrowId))
}

// =============================================================================
// View Parsing
// =============================================================================

/// Multi-output views decode as a flat list; single-struct views as one tuple.
fn fields<'a>(output: &'a [DynSolValue], expected: usize) -> Option<&'a [DynSolValue]> {
    match output {
        [DynSolValue::Tuple(inner)] if inner.len() == expected => Some(inner),
        flat if flat.len() == expected => Some(flat),
        _ => None,
    }
}

fn field_u256(method: &str, name: &str, value: &DynSolValue) -> Result<U256, GatewayError> {
    value
        .as_uint()
        .map(|(v, _)| v)
        .ok_or_else(|| GatewayError::decode(method, format!("{name}: expected uint")))
}

fn field_u64(method: &str, name: &str, value: &DynSolValue) -> Result<u64, GatewayError> {
    let v = field_u256(method, name, value)?;
    u64::try_from(v).map_err(|_| GatewayError::decode(method, format!("{name}: {v} overflows u64")))
}

fn field_u8(method: &str, name: &str, value: &DynSolValue) -> Result<u8, GatewayError> {
    let v = field_u256(method, name, value)?;
    u8::try_from(v).map_err(|_| GatewayError::decode(method, format!("{name}: {v} overflows u8")))
}

fn field_address(method: &str, name: &str, value: &DynSolValue) -> Result<Address, GatewayError> {
    value
        .as_address()
        .ok_or_else(|| GatewayError::decode(method, format!("{name}: expected address")))
}

fn field_string(method: &str, name: &str, value: &DynSolValue) -> Result<String, GatewayError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GatewayError::decode(method, format!("{name}: expected string")))
}

fn field_b256(method: &str, name: &str, value: &DynSolValue) -> Result<B256, GatewayError> {
    match value.as_fixed_bytes() {
        Some((bytes, 32)) => Ok(B256::from_slice(bytes)),
        _ => Err(GatewayError::decode(method, format!("{name}: expected bytes32"))),
    }
}

/// Decode `getEscrow` output.
pub fn parse_escrow_record(output: &[DynSolValue]) -> Result<EscrowRecord, GatewayError> {
    const M: &str = "getEscrow";
    let f = fields(output, 11)
        .ok_or_else(|| GatewayError::decode(M, format!("expected 11 fields, got {}", output.len())))?;

    let code = field_u8(M, "status", &f[7])?;
    let status = EscrowStatus::from_chain_code(code)
        .ok_or_else(|| GatewayError::decode(M, format!("unknown status code {code}")))?;

    Ok(EscrowRecord {
        id: field_u64(M, "id", &f[0])?,
        buyer: field_address(M, "buyer", &f[1])?,
        seller: field_address(M, "seller", &f[2])?,
        amount: field_u256(M, "amount", &f[3])?,
        platform_fee: field_u256(M, "platformFee", &f[4])?,
        created_at: field_u64(M, "createdAt", &f[5])?,
        expires_at: field_u64(M, "expiresAt", &f[6])?,
        status,
        description: field_string(M, "description", &f[8])?,
        metadata_hash: field_b256(M, "metadataHash", &f[9])?,
        token: field_address(M, "token", &f[10])?,
    })
}

/// Decode `getMilestones` output.
pub fn parse_milestones(output: &[DynSolValue]) -> Result<Vec<Milestone>, GatewayError> {
    const M: &str = "getMilestones";
    let items = output
        .first()
        .and_then(DynSolValue::as_array)
        .ok_or_else(|| GatewayError::decode(M, "expected an array"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let f = item
                .as_tuple()
                .filter(|t| t.len() == 4)
                .ok_or_else(|| GatewayError::decode(M, format!("milestone {i}: expected 4-tuple")))?;
            Ok(Milestone {
                amount: field_u256(M, "amount", &f[0])?,
                description: field_string(M, "description", &f[1])?,
                completed: f[2]
                    .as_bool()
                    .ok_or_else(|| GatewayError::decode(M, "completed: expected bool"))?,
                completed_at: field_u64(M, "completedAt", &f[3])?,
            })
        })
        .collect()
}

/// Decode `disputes(id)` output. A zero escrow id means no dispute exists.
pub fn parse_dispute(output: &[DynSolValue]) -> Result<Option<OnChainDispute>, GatewayError> {
    const M: &str = "disputes";
    let f = fields(output, 7)
        .ok_or_else(|| GatewayError::decode(M, format!("expected 7 fields, got {}", output.len())))?;

    let escrow_id = field_u64(M, "escrowId", &f[0])?;
    if escrow_id == 0 {
        return Ok(None);
    }

    Ok(Some(OnChainDispute {
        escrow_id,
        initiator: field_address(M, "initiator", &f[1])?,
        reason: field_string(M, "reason", &f[2])?,
        arbitrator: field_address(M, "arbitrator", &f[3])?,
        resolution: Winner::from_chain_code(field_u8(M, "resolution", &f[4])?),
        created_at: field_u64(M, "createdAt", &f[5])?,
        resolved_at: field_u64(M, "resolvedAt", &f[6])?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;

    fn created_log(emitter: Address, escrow_id: u64) -> Log {
        let event = EscrowCreated {
            escrowId: U256::from(escrow_id),
            buyer: Address::repeat_byte(0x11),
            seller: Address::repeat_byte(0x22),
            amount: U256::from(1_500_000_000_000_000_000u64),
        };
        Log {
            address: emitter,
            data: event.encode_log_data(),
        }
    }

    fn escrow_output(status: u8) -> Vec<DynSolValue> {
        vec![
            uint(42),
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::Address(Address::repeat_byte(0x22)),
            DynSolValue::Uint(U256::from(1_500u64), 256),
            DynSolValue::Uint(U256::from(15u64), 256),
            uint(1_700_000_000),
            uint(1_700_600_000),
            DynSolValue::Uint(U256::from(status), 8),
            DynSolValue::String("Logo design".to_string()),
            DynSolValue::FixedBytes(B256::repeat_byte(0xaa), 32),
            DynSolValue::Address(Address::ZERO),
        ]
    }

    #[test]
    fn abis_parse() {
        let escrow = parse_abi(ESCROW_ABI).unwrap();
        for name in [
            "createEscrow",
            "fundEscrow",
            "releasePayment",
            "fileDispute",
            "cancelEscrow",
            "getEscrow",
            "getMilestones",
            "supportedTokens",
        ] {
            assert!(escrow.function(name).is_some(), "missing {name}");
        }
        assert!(escrow.event("EscrowCreated").is_some());

        let dispute = parse_abi(DISPUTE_ABI).unwrap();
        for name in ["addEvidence", "resolveDispute", "disputes"] {
            assert!(dispute.function(name).is_some(), "missing {name}");
        }
        assert!(dispute.function("openDispute").is_none());
    }

    #[test]
    fn abi_event_matches_typed_event() {
        let escrow = parse_abi(ESCROW_ABI).unwrap();
        let events = escrow.event("EscrowCreated").unwrap();
        assert_eq!(events[0].selector(), EscrowCreated::SIGNATURE_HASH);
    }

    #[test]
    fn extracts_escrow_id_from_creation_event() {
        let emitter = Address::repeat_byte(0xee);
        let noise = Log {
            address: emitter,
            data: LogData::new_unchecked(vec![B256::repeat_byte(0x01)], Default::default()),
        };
        let logs = vec![noise, created_log(emitter, 42)];
        assert_eq!(extract_escrow_id(&logs, emitter), Ok(42));
    }

    #[test]
    fn missing_event_is_an_error() {
        let emitter = Address::repeat_byte(0xee);
        assert!(extract_escrow_id(&[], emitter).is_err());
        // Right event, wrong emitter.
        let foreign = created_log(Address::repeat_byte(0x99), 42);
        assert!(extract_escrow_id(&[foreign], emitter).is_err());
    }

    #[test]
    fn zero_escrow_id_is_an_error() {
        let emitter = Address::repeat_byte(0xee);
        let err = extract_escrow_id(&[created_log(emitter, 0)], emitter).unwrap_err();
        assert!(err.contains("id 0"));
    }

    #[test]
    fn truncated_event_is_an_error() {
        let emitter = Address::repeat_byte(0xee);
        let mut log = created_log(emitter, 42);
        log.data = LogData::new_unchecked(vec![EscrowCreated::SIGNATURE_HASH], Default::default());
        let err = extract_escrow_id(&[log], emitter).unwrap_err();
        assert!(err.contains("could not be decoded"));
    }

    #[test]
    fn parses_flat_and_tuple_escrow_output() {
        let flat = escrow_output(1);
        let record = parse_escrow_record(&flat).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.status, EscrowStatus::Funded);
        assert_eq!(record.platform_fee, U256::from(15u64));
        assert_eq!(record.metadata_hash, B256::repeat_byte(0xaa));
        assert_eq!(record.token, Address::ZERO);

        let tupled = vec![DynSolValue::Tuple(flat)];
        assert_eq!(parse_escrow_record(&tupled).unwrap(), record);
    }

    #[test]
    fn rejects_unknown_status_and_bad_shape() {
        let err = parse_escrow_record(&escrow_output(9)).unwrap_err();
        assert_eq!(err.method(), Some("getEscrow"));

        let mut short = escrow_output(0);
        short.pop();
        assert!(parse_escrow_record(&short).is_err());
    }

    #[test]
    fn parses_milestones() {
        let output = vec![DynSolValue::Array(vec![
            DynSolValue::Tuple(vec![
                DynSolValue::Uint(U256::from(500u64), 256),
                DynSolValue::String("Draft".to_string()),
                DynSolValue::Bool(true),
                uint(1_700_000_100),
            ]),
            DynSolValue::Tuple(vec![
                DynSolValue::Uint(U256::from(1_000u64), 256),
                DynSolValue::String("Final".to_string()),
                DynSolValue::Bool(false),
                uint(0),
            ]),
        ])];
        let milestones = parse_milestones(&output).unwrap();
        assert_eq!(milestones.len(), 2);
        assert!(milestones[0].completed);
        assert_eq!(milestones[1].description, "Final");
        assert_eq!(milestones[1].completed_at, 0);
    }

    #[test]
    fn parses_dispute_or_absence() {
        let mut output = vec![
            uint(42),
            DynSolValue::Address(Address::repeat_byte(0x11)),
            DynSolValue::String("Not delivered".to_string()),
            DynSolValue::Address(Address::repeat_byte(0x33)),
            DynSolValue::Uint(U256::from(2u64), 8),
            uint(1_700_000_000),
            uint(1_700_000_500),
        ];
        let dispute = parse_dispute(&output).unwrap().unwrap();
        assert_eq!(dispute.resolution, Some(Winner::Seller));
        assert_eq!(dispute.arbitrator, Address::repeat_byte(0x33));

        output[0] = uint(0);
        assert_eq!(parse_dispute(&output).unwrap(), None);
    }
}
