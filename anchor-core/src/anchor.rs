//! Anchoring orchestration
//!
//! Drives Pending transactions onto the ledger. A transaction becomes
//! Uploaded only after the ledger returned a receipt, and the receipt and
//! status change are persisted together. Any gateway failure leaves the
//! transaction Pending.
//!
//! A submission can land on the ledger while the caller sees a failure
//! (timeout, lost response, failed local write). The ledger then refuses the
//! retry as a duplicate, so a rejected upload reads the ledger record back
//! and adopts it when it holds the same commitment.
//!
//! # Example
//!
//! ```no_run
//! use anchor_core::{config::AnchoringConfig, gateway::InMemoryLedger, AnchorOrchestrator, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anchor_core::Result<()> {
//!     let store = Store::in_memory().await?;
//!     let gateway = Arc::new(InMemoryLedger::new("reconciliation"));
//!     let orchestrator = AnchorOrchestrator::new(store, gateway, &AnchoringConfig::default());
//!
//!     let result = orchestrator
//!         .batch_upload_to_chain(&["TX001".to_string(), "TX002".to_string()])
//!         .await;
//!     println!("{} anchored, {} failed", result.success, result.failed);
//!     Ok(())
//! }
//! ```

use crate::config::AnchoringConfig;
use crate::error::GatewayResult;
use crate::gateway::{CommitmentRecord, LedgerGateway, LedgerReceipt, LedgerStatistics};
use crate::types::{
    BatchUploadResult, ChainReceipt, Institution, RegisterInstitutionRequest, TxStatus,
};
use crate::{Error, GatewayError, Metrics, Result, Store};
use dashmap::DashSet;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Single and batch ledger uploads
#[derive(Debug)]
pub struct AnchorOrchestrator {
    store: Store,
    gateway: Arc<dyn LedgerGateway>,
    call_timeout: Duration,
    batch_concurrency: usize,
    in_flight: DashSet<String>,
    metrics: Option<Metrics>,
}

/// Held while a BizID is being uploaded
struct InFlightClaim<'a> {
    set: &'a DashSet<String>,
    biz_id: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.biz_id);
    }
}

impl AnchorOrchestrator {
    /// Orchestrator over `store` and `gateway`
    pub fn new(store: Store, gateway: Arc<dyn LedgerGateway>, config: &AnchoringConfig) -> Self {
        Self {
            store,
            gateway,
            call_timeout: config.call_timeout(),
            batch_concurrency: config.batch_concurrency.max(1),
            in_flight: DashSet::new(),
            metrics: None,
        }
    }

    /// Record upload metrics
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ledger gateway
    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    /// Anchor one Pending transaction
    pub async fn upload_to_chain(&self, biz_id: &str) -> Result<ChainReceipt> {
        let _claim = self.claim(biz_id)?;

        let tx = self.store.get_transaction(biz_id).await?;
        if tx.status != TxStatus::Pending {
            return Err(Error::InvalidState(format!(
                "{} is {}, only pending transactions can be uploaded",
                biz_id, tx.status
            )));
        }

        let started = Instant::now();
        let result = self
            .bounded(self.gateway.upload_commitment(biz_id, &tx.data_hash))
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let result = match result {
            Err(Error::Gateway(GatewayError::Rejected(reason))) => {
                match self.anchored_receipt(biz_id, &tx.data_hash).await {
                    Some(receipt) => Ok(receipt),
                    None => Err(GatewayError::Rejected(reason).into()),
                }
            }
            other => other,
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_upload(false, elapsed);
                }
                warn!(biz_id = %biz_id, error = %e, "Ledger upload failed, transaction stays pending");
                return Err(e);
            }
        };

        let saved = match self
            .store
            .mark_uploaded(biz_id, &receipt, self.gateway.endpoint())
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                // The ledger holds the commitment but the local row is unchanged
                error!(
                    biz_id = %biz_id,
                    tx_hash = %receipt.tx_hash,
                    error = %e,
                    "Failed to persist chain receipt"
                );
                return Err(e);
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_upload(true, elapsed);
        }
        info!(
            biz_id = %biz_id,
            tx_hash = %saved.tx_hash,
            block_height = saved.block_height,
            "Transaction anchored"
        );
        Ok(saved)
    }

    /// Receipt for a commitment the ledger already holds, if it matches ours
    async fn anchored_receipt(&self, biz_id: &str, data_hash: &str) -> Option<LedgerReceipt> {
        let record = match self.bounded(self.gateway.query_commitment(biz_id)).await {
            Ok(record) => record,
            Err(e) => {
                debug!(biz_id = %biz_id, error = %e, "Ledger record unavailable");
                return None;
            }
        };
        if !record
            .data_hash
            .trim_start_matches("0x")
            .eq_ignore_ascii_case(data_hash)
        {
            warn!(biz_id = %biz_id, "Ledger holds a different commitment");
            return None;
        }

        info!(
            biz_id = %biz_id,
            tx_hash = %record.tx_hash,
            block_height = record.block_height,
            "Commitment already anchored, adopting ledger record"
        );
        Some(LedgerReceipt {
            tx_hash: record.tx_hash,
            block_height: record.block_height,
            block_hash: String::new(),
            resource_cost: 0,
        })
    }

    /// Anchor several transactions, isolating per-item failures
    ///
    /// Duplicate ids are attempted once. `success_ids` and `failed_ids`
    /// partition the distinct input ids.
    pub async fn batch_upload_to_chain(&self, biz_ids: &[String]) -> BatchUploadResult {
        let mut seen = HashSet::with_capacity(biz_ids.len());
        let unique: Vec<String> = biz_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut result = BatchUploadResult {
            total: unique.len(),
            ..Default::default()
        };

        let outcomes: Vec<(String, Result<ChainReceipt>)> = stream::iter(unique)
            .map(|biz_id| async move {
                let outcome = self.upload_to_chain(&biz_id).await;
                (biz_id, outcome)
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        for (biz_id, outcome) in outcomes {
            match outcome {
                Ok(_) => result.success_ids.push(biz_id),
                Err(e) => {
                    debug!(biz_id = %biz_id, error = %e, "Batch item failed");
                    result.failed_ids.push(biz_id);
                }
            }
        }
        result.success = result.success_ids.len();
        result.failed = result.failed_ids.len();

        info!(
            total = result.total,
            success = result.success,
            failed = result.failed,
            "Batch upload finished"
        );
        result
    }

    /// Register an institution on the ledger, then locally as Enabled
    pub async fn register_institution(
        &self,
        request: &RegisterInstitutionRequest,
    ) -> Result<Institution> {
        for (field, value) in [
            ("institution_id", &request.institution_id),
            ("name", &request.name),
            ("ledger_address", &request.ledger_address),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", field)));
            }
        }

        match self.store.get_institution(&request.institution_id).await {
            Ok(_) => return Err(Error::Duplicate(request.institution_id.clone())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let registered = self
            .bounded(
                self.gateway
                    .register_participant(&request.name, &request.ledger_address),
            )
            .await;
        let tx_hash = match registered {
            Ok(receipt) => receipt.tx_hash,
            Err(Error::Gateway(GatewayError::Rejected(reason))) => {
                // A previous attempt may have registered without the local insert
                match self
                    .bounded(self.gateway.query_participant(&request.ledger_address))
                    .await
                {
                    Ok(name) if name == request.name => {
                        info!(address = %request.ledger_address, "Participant already registered on the ledger");
                        String::new()
                    }
                    _ => return Err(GatewayError::Rejected(reason).into()),
                }
            }
            Err(e) => return Err(e),
        };

        let institution = self.store.insert_institution(request).await?;
        info!(
            institution_id = %institution.institution_id,
            tx_hash = %tx_hash,
            "Institution registered"
        );
        Ok(institution)
    }

    /// Commitment as recorded on the ledger
    pub async fn query_ledger_record(&self, biz_id: &str) -> Result<CommitmentRecord> {
        self.bounded(self.gateway.query_commitment(biz_id)).await
    }

    /// Ledger-wide statistics
    pub async fn ledger_statistics(&self) -> Result<LedgerStatistics> {
        self.bounded(self.gateway.query_statistics()).await
    }

    fn claim(&self, biz_id: &str) -> Result<InFlightClaim<'_>> {
        if !self.in_flight.insert(biz_id.to_string()) {
            return Err(Error::InvalidState(format!(
                "upload of {} already in progress",
                biz_id
            )));
        }
        Ok(InFlightClaim {
            set: &self.in_flight,
            biz_id: biz_id.to_string(),
        })
    }

    async fn bounded<T>(&self, call: impl Future<Output = GatewayResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::ConsensusTimeout(self.call_timeout).into()),
        }
    }
}
