//! # Athletia Runtime
//!
//! Entry point for the on-chain state reconciliation service.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (CLI flags, environment fallbacks)
//! 2. Validate the watched contract addresses
//! 3. Historical sync of all three fields
//! 4. Attach live listeners to the node connection
//! 5. Optionally submit one mint
//! 6. Run until Ctrl+C, then detach

use std::sync::Arc;

use anyhow::{Context, Result};
use athletia_runtime::{run_presenter, Args};
use athletia_sync::{JsonRpcNode, NodeConnection, ReconciliationApi, ReconciliationEngine};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let args = Args::parse();
    let config = args.sync_config()?;
    let engine = ReconciliationEngine::new(config.clone()).context("failed to create engine")?;

    let mut rpc = JsonRpcNode::new(&args.rpc_url, config.call_timeout(), args.poll_interval());
    if let Some(minter) = args.minter {
        rpc = rpc.with_sender(minter);
    }
    info!(rpc_url = %rpc.rpc_url(), "Connecting to node");
    let node: Arc<dyn NodeConnection> = Arc::new(rpc);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let presenter = tokio::spawn(run_presenter(
        engine.state_stream(),
        engine.subscribe_signals(),
        shutdown_rx,
    ));

    let report = engine.bootstrap(node.as_ref()).await;
    for failure in &report.failures {
        warn!(field = %failure.field, error = %failure.error, "Initial fetch failed");
    }

    let session = engine
        .attach(Arc::clone(&node))
        .await
        .context("failed to attach live listeners")?;

    if let Some(recipient) = args.mint_to {
        match engine.trigger_mint(node.as_ref(), recipient).await {
            Ok(tx_hash) => info!(tx = ?tx_hash, "Mint submitted"),
            Err(e) => error!(error = %e, "Mint submission failed"),
        }
    }

    info!("Reconciliation is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    engine.detach(&session).await;
    shutdown_tx.send_replace(true);
    if let Err(e) = presenter.await {
        warn!(error = %e, "Presenter task ended abnormally");
    }

    Ok(())
}
