// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vendor directory collaborator: `vendorId -> {walletAddress, chain}`.

use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorRecord {
    pub wallet_address: Address,
    pub chain: String,
    /// Marketplace rating, if the vendor has been reviewed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

/// Where vendor wallets are looked up. Owned by the marketplace, not the engine.
#[async_trait]
pub trait VendorDirectory: Send + Sync {
    async fn lookup(&self, vendor_id: &str) -> Option<VendorRecord>;
}

/// Directory held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVendorDirectory {
    vendors: DashMap<String, VendorRecord>,
}

impl InMemoryVendorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vendor_id: impl Into<String>, record: VendorRecord) {
        self.vendors.insert(vendor_id.into(), record);
    }

    pub fn remove(&self, vendor_id: &str) -> Option<VendorRecord> {
        self.vendors.remove(vendor_id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}

#[async_trait]
impl VendorDirectory for InMemoryVendorDirectory {
    async fn lookup(&self, vendor_id: &str) -> Option<VendorRecord> {
        self.vendors.get(vendor_id).map(|entry| entry.value().clone())
    }
}
