// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Mirror Reconciler
//!
//! Background task that periodically reconciles every non-terminal mirror
//! with the chain, so drift (expiry, out-of-band dispute settlement,
//! writes whose mirror update failed) is repaired without a user read.
//!
//! Shutdown goes through a `tokio_util::sync::CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ledger::EscrowLedger;

/// Default interval between sweeps.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

pub struct Reconciler {
    ledger: Arc<EscrowLedger>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(ledger: Arc<EscrowLedger>) -> Self {
        Self {
            ledger,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Mirror reconciler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Mirror reconciler shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Mirror reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// One sweep over all open escrows. Returns how many were reconciled.
    pub async fn sweep(&self) -> usize {
        let open_ids = match self.ledger.open_escrow_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Reconciler: failed to list open escrows");
                return 0;
            }
        };
        if open_ids.is_empty() {
            return 0;
        }

        debug!(count = open_ids.len(), "Reconciler: sweeping open escrows");

        let mut reconciled = 0;
        for escrow_id in open_ids {
            match self.ledger.reconcile(escrow_id).await {
                Ok(mirror) => {
                    reconciled += 1;
                    debug!(escrow_id, status = ?mirror.status, "Reconciler: escrow checked");
                }
                Err(e) => {
                    warn!(escrow_id, error = %e, "Reconciler: failed to reconcile escrow");
                }
            }
        }
        reconciled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::testing::{self, FakeChain};
    use crate::escrow::types::{CreateEscrowRequest, EscrowStatus};
    use crate::storage::MirrorDatabase;
    use alloy::primitives::Address;

    fn request() -> CreateEscrowRequest {
        CreateEscrowRequest {
            seller: testing::seller(),
            description: "Copywriting".to_string(),
            milestones: vec![],
            token: Address::ZERO,
            amount: "3".to_string(),
            buyer_email: None,
            seller_email: None,
        }
    }

    #[tokio::test]
    async fn sweep_repairs_drifted_mirrors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MirrorDatabase::open(&dir.path().join("m.redb")).unwrap());
        let chain = Arc::new(FakeChain::new());
        let ledger = Arc::new(EscrowLedger::new(chain.clone(), store));

        let a = ledger.create(request()).await.unwrap().escrow_id;
        let b = ledger.create(request()).await.unwrap().escrow_id;
        ledger.refund(b).await.unwrap();
        chain.set_status(a, EscrowStatus::Cancelled);

        let reconciler = Reconciler::new(Arc::clone(&ledger));
        // b is terminal and skipped.
        assert_eq!(reconciler.sweep().await, 1);
        assert_eq!(
            ledger.mirror(a).unwrap().unwrap().status,
            EscrowStatus::Cancelled
        );
        assert_eq!(reconciler.sweep().await, 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MirrorDatabase::open(&dir.path().join("m.redb")).unwrap());
        let ledger = Arc::new(EscrowLedger::new(Arc::new(FakeChain::new()), store));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            Reconciler::new(ledger)
                .with_interval(Duration::from_secs(3600))
                .run(shutdown.clone()),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
