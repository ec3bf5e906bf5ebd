// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded escrow mirror database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `mirrors`: transaction_id → serialized TransactionMirror
//! - `escrow_index`: escrow_id → transaction_id
//! - `seller_index`: composite key (seller|transaction_id) → escrow_id

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::escrow::types::TransactionMirror;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: transaction_id → serialized TransactionMirror (JSON bytes).
const MIRRORS: TableDefinition<&str, &[u8]> = TableDefinition::new("mirrors");

/// Index: on-chain escrow id → transaction_id.
const ESCROW_INDEX: TableDefinition<u64, &str> = TableDefinition::new("escrow_index");

/// Index: `lowercase_seller|transaction_id` → escrow id.
const SELLER_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("seller_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MirrorDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("escrow {escrow_id} is already mirrored by {transaction_id}")]
    Conflict {
        escrow_id: u64,
        transaction_id: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MirrorDbResult<T> = Result<T, MirrorDbError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

fn make_seller_key(seller: &str, transaction_id: &str) -> Vec<u8> {
    let seller = seller.to_lowercase();
    let mut key = Vec::with_capacity(seller.len() + 1 + transaction_id.len());
    key.extend_from_slice(seller.as_bytes());
    key.push(b'|');
    key.extend_from_slice(transaction_id.as_bytes());
    key
}

fn make_seller_prefix(seller: &str) -> Vec<u8> {
    let seller = seller.to_lowercase();
    let mut prefix = Vec::with_capacity(seller.len() + 1);
    prefix.extend_from_slice(seller.as_bytes());
    prefix.push(b'|');
    prefix
}

fn make_seller_prefix_end(seller: &str) -> Vec<u8> {
    let mut end = make_seller_prefix(seller);
    // '|' + 1: first byte past every key sharing the prefix
    if let Some(last) = end.last_mut() {
        *last += 1;
    }
    end
}

// =============================================================================
// MirrorDatabase
// =============================================================================

/// Document store for escrow mirrors. Only the escrow ledger writes here.
pub struct MirrorDatabase {
    db: Database,
}

impl MirrorDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> MirrorDbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MIRRORS)?;
            let _ = write_txn.open_table(ESCROW_INDEX)?;
            let _ = write_txn.open_table(SELLER_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store a brand-new mirror.
    ///
    /// Fails with [`MirrorDbError::Conflict`] if another mirror already claims
    /// the escrow id.
    pub fn insert_mirror(&self, mirror: &TransactionMirror) -> MirrorDbResult<()> {
        let json = serde_json::to_vec(mirror)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut escrow_idx = write_txn.open_table(ESCROW_INDEX)?;
            if let Some(existing) = escrow_idx.get(mirror.escrow_id)? {
                let transaction_id = existing.value().to_string();
                if transaction_id != mirror.transaction_id {
                    return Err(MirrorDbError::Conflict {
                        escrow_id: mirror.escrow_id,
                        transaction_id,
                    });
                }
            }
            escrow_idx.insert(mirror.escrow_id, mirror.transaction_id.as_str())?;

            let mut mirrors = write_txn.open_table(MIRRORS)?;
            mirrors.insert(mirror.transaction_id.as_str(), json.as_slice())?;

            let mut seller_idx = write_txn.open_table(SELLER_INDEX)?;
            let key = make_seller_key(&mirror.seller, &mirror.transaction_id);
            seller_idx.insert(key.as_slice(), mirror.escrow_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Overwrite an existing mirror document. Index keys never change.
    pub fn update_mirror(&self, mirror: &TransactionMirror) -> MirrorDbResult<()> {
        let json = serde_json::to_vec(mirror)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut mirrors = write_txn.open_table(MIRRORS)?;
            mirrors.insert(mirror.transaction_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up a mirror by its transaction id.
    pub fn get_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> MirrorDbResult<Option<TransactionMirror>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MIRRORS)?;
        match table.get(transaction_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Look up a mirror by on-chain escrow id.
    pub fn get_by_escrow_id(&self, escrow_id: u64) -> MirrorDbResult<Option<TransactionMirror>> {
        let read_txn = self.db.begin_read()?;
        let escrow_idx = read_txn.open_table(ESCROW_INDEX)?;
        let Some(transaction_id) = escrow_idx.get(escrow_id)? else {
            return Ok(None);
        };

        let mirrors = read_txn.open_table(MIRRORS)?;
        match mirrors.get(transaction_id.value())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All mirrors where `seller` is the seller (case-insensitive).
    pub fn list_by_seller(&self, seller: &str) -> MirrorDbResult<Vec<TransactionMirror>> {
        let read_txn = self.db.begin_read()?;
        let seller_idx = read_txn.open_table(SELLER_INDEX)?;
        let escrow_idx = read_txn.open_table(ESCROW_INDEX)?;
        let mirrors = read_txn.open_table(MIRRORS)?;

        let start = make_seller_prefix(seller);
        let end = make_seller_prefix_end(seller);

        let mut results = Vec::new();
        for entry in seller_idx.range(start.as_slice()..end.as_slice())? {
            let (_, escrow_id) = entry?;
            if let Some(transaction_id) = escrow_idx.get(escrow_id.value())? {
                if let Some(value) = mirrors.get(transaction_id.value())? {
                    results.push(serde_json::from_slice(value.value())?);
                }
            }
        }
        Ok(results)
    }

    /// Escrow ids whose mirror is not in a terminal state.
    pub fn list_open_escrow_ids(&self) -> MirrorDbResult<Vec<u64>> {
        let read_txn = self.db.begin_read()?;
        let mirrors = read_txn.open_table(MIRRORS)?;

        let mut ids = Vec::new();
        for entry in mirrors.iter()? {
            let (_, value) = entry?;
            let mirror: TransactionMirror = serde_json::from_slice(value.value())?;
            if !mirror.status.is_terminal() {
                ids.push(mirror.escrow_id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Total number of mirrors.
    pub fn count(&self) -> MirrorDbResult<u64> {
        let read_txn = self.db.begin_read()?;
        let mirrors = read_txn.open_table(MIRRORS)?;
        Ok(mirrors.len()?)
    }
}
