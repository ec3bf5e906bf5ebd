// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use relational_escrow_engine::config::EngineConfig;
use relational_escrow_engine::logging::{self, LogFormat};
use relational_escrow_engine::state::EngineState;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(LogFormat::from_env());

    let config = EngineConfig::from_env().inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    info!(config = ?config, "Configuration loaded");

    let state = EngineState::build(&config)
        .await
        .inspect_err(|e| error!(error = %e, "Engine startup failed"))?;

    let shutdown = CancellationToken::new();
    let reconciler = state.reconciler().map(|reconciler| {
        let token = shutdown.clone();
        tokio::spawn(async move { reconciler.run(token).await })
    });
    if reconciler.is_none() {
        info!("Background reconciliation disabled");
    }

    info!(
        chain_id = state.connector.chain_id(),
        endpoint = %state.connector.current().endpoint().name,
        "Relational escrow engine running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Some(handle) = reconciler {
        if let Err(e) = handle.await {
            error!(error = %e, "Reconciler task failed");
        }
    }
    state.shutdown();

    info!("Relational escrow engine stopped");
    Ok(())
}
