//! Anchoring node
//!
//! `anchor-node [--config node.toml] [run]` runs the reconciliation loop
//! until Ctrl-C. `anchor-node [--config node.toml] import <file.csv>
//! <institution_id>` imports a CSV file, anchors the created transactions
//! and exits.

use anchor_core::gateway;
use anchor_core::keys::{EnvKeySource, KeySource};
use anchor_core::{AnchorOrchestrator, Metrics, Store, TransactionService};
use anyhow::Context;
use clap::{Parser, Subcommand};
use reconciliation::{LedgerVerdictPolicy, ReconciliationLoop};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconciliationSection {
    reconciliation: reconciliation::Config,
}

#[derive(Debug, Parser)]
#[command(name = "anchor-node", about = "Transaction anchoring and reconciliation node")]
#[command(version)]
struct Cli {
    /// TOML configuration file, environment variables only when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconciliation loop until Ctrl-C (default)
    Run,

    /// Import a CSV file and anchor the created transactions
    Import {
        /// CSV file with biz_id, amount, sender, receiver and optional tx_type
        file: PathBuf,
        /// Institution the rows belong to
        institution_id: String,
    },
}

fn load_config(
    path: Option<&Path>,
) -> anyhow::Result<(anchor_core::Config, reconciliation::Config)> {
    match path {
        Some(path) => {
            let core = anchor_core::Config::from_file(path)?
                .with_overrides(|key| std::env::var(key).ok())?;
            core.validate()?;

            let content = std::fs::read_to_string(path)?;
            let section: ReconciliationSection =
                toml::from_str(&content).context("invalid [reconciliation] section")?;
            let recon = section
                .reconciliation
                .with_overrides(|key| std::env::var(key).ok())?;
            recon.validate()?;
            Ok((core, recon))
        }
        None => Ok((
            anchor_core::Config::from_env()?,
            reconciliation::Config::from_env()?,
        )),
    }
}

fn init_tracing(config: &anchor_core::config::LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, recon_config) = load_config(cli.config.as_deref())?;

    init_tracing(&config.log);
    info!(
        service = %config.service_name,
        version = %config.service_version,
        gateway = %config.gateway.kind,
        "Anchor node starting"
    );

    let store = Store::connect(&config.store).await?;
    store.migrate().await?;

    let key = EnvKeySource::new(&config.encryption.key_env).load()?;

    let ledger = gateway::build(&config.gateway)?;
    let height = ledger
        .connect()
        .await
        .context("ledger endpoint unreachable")?;
    info!(endpoint = %ledger.endpoint(), block_height = height, "Ledger connected");

    let metrics = Metrics::new()?;
    let service = TransactionService::new(store.clone(), key).with_metrics(metrics.clone());
    let orchestrator = AnchorOrchestrator::new(store.clone(), ledger.clone(), &config.anchoring)
        .with_metrics(metrics.clone());

    match cli.command.unwrap_or(Command::Run) {
        Command::Import {
            file,
            institution_id,
        } => {
            let reader = std::fs::File::open(&file)
                .with_context(|| format!("cannot open {}", file.display()))?;
            let report = service.import_csv(reader, &institution_id).await?;
            for rejection in &report.rejected {
                warn!(
                    row = rejection.row,
                    biz_id = %rejection.biz_id,
                    reason = %rejection.reason,
                    "Row rejected"
                );
            }

            let result = orchestrator
                .batch_upload_to_chain(&report.success_ids)
                .await;
            info!(
                imported = report.success,
                rejected = report.failed,
                anchored = result.success,
                anchor_failures = result.failed,
                "Import finished"
            );
        }
        Command::Run => {
            let recon = Arc::new(
                ReconciliationLoop::new(
                    store.clone(),
                    ledger.clone(),
                    Arc::new(LedgerVerdictPolicy),
                    recon_config.clone(),
                )
                .with_metrics(metrics.clone()),
            );

            let shutdown = CancellationToken::new();
            let handle = recon.spawn(shutdown.clone());
            info!("Anchor node ready");

            tokio::signal::ctrl_c().await?;
            info!("Shutdown requested");
            shutdown.cancel();

            match tokio::time::timeout(recon_config.shutdown_grace(), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Reconciliation task panicked"),
                Err(_) => warn!(
                    grace_ms = recon_config.shutdown_grace_ms,
                    "Reconciliation loop did not stop within the grace period"
                ),
            }
        }
    }

    tracing::debug!(metrics = %metrics.gather_text(), "Final metrics");
    store.close().await;
    info!("Anchor node stopped");
    Ok(())
}
