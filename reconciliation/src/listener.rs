//! Ledger event polling
//!
//! One cooperative task. Every tick it ingests new ledger events into the
//! event log, then works through unprocessed rows in ledger order. The
//! cursor is the highest persisted block height, fetched inclusively, so a
//! restart or a partially ingested block never skips events; the unique key
//! on the event log absorbs the overlap.
//!
//! Rows are read in pages of `batch_size`. Deferred rows stay unprocessed
//! and are paged past, so up to `batch_size` actionable rows are handled per
//! poll however many deferred rows sit ahead of them.

use crate::config::Config;
use crate::policy::{MatchPolicy, Verdict};
use crate::Result;
use anchor_core::types::{EventLog, EventType};
use anchor_core::{Error as CoreError, GatewayError, LedgerGateway, Metrics, Store};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counts for one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Events returned by the ledger
    pub fetched: usize,
    /// Events not seen before
    pub ingested: usize,
    /// Verdicts applied
    pub applied: usize,
    /// Events left for a later poll
    pub deferred: usize,
    /// Events discarded with a warning
    pub rejected: usize,
    /// Informational events marked processed
    pub skipped: usize,
}

/// Background reconciliation loop
#[derive(Debug)]
pub struct ReconciliationLoop {
    store: Store,
    gateway: Arc<dyn LedgerGateway>,
    policy: Arc<dyn MatchPolicy>,
    config: Config,
    metrics: Option<Metrics>,
}

impl ReconciliationLoop {
    /// Loop over `store` and `gateway`, deciding with `policy`
    pub fn new(
        store: Store,
        gateway: Arc<dyn LedgerGateway>,
        policy: Arc<dyn MatchPolicy>,
        config: Config,
    ) -> Self {
        Self {
            store,
            gateway,
            policy,
            config,
            metrics: None,
        }
    }

    /// Count ingested events, verdicts and poll errors
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Loop configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one ingest-and-apply cycle
    pub async fn poll_once(&self) -> Result<PollReport> {
        let mut report = PollReport::default();

        let cursor = self.store.max_event_height().await?.unwrap_or(0);
        let events = tokio::time::timeout(
            self.config.call_timeout(),
            self.gateway.fetch_events(cursor),
        )
        .await
        .map_err(|_| GatewayError::ConsensusTimeout(self.config.call_timeout()))??;

        report.fetched = events.len();
        for event in &events {
            if self.store.record_event(event).await? {
                report.ingested += 1;
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.events_ingested.inc_by(report.ingested as u64);
        }

        let limit = self.config.batch_size as usize;
        let mut after = None;
        let mut handled = 0;
        loop {
            let page = self
                .store
                .unprocessed_events_after(after.as_ref(), self.config.batch_size)
                .await?;
            let full = page.len() == limit;
            for event in page {
                let deferred = report.deferred;
                self.process(&event, &mut report).await?;
                if report.deferred == deferred {
                    handled += 1;
                }
                after = Some(event);
            }
            if !full || handled >= limit {
                break;
            }
        }

        if report.ingested > 0 || report.applied > 0 {
            debug!(
                cursor,
                fetched = report.fetched,
                ingested = report.ingested,
                applied = report.applied,
                deferred = report.deferred,
                rejected = report.rejected,
                "Poll finished"
            );
        }
        Ok(report)
    }

    async fn process(&self, event: &EventLog, report: &mut PollReport) -> Result<()> {
        if event.event_type != EventType::ReconciliationEvent {
            self.store.mark_event_processed(event.id).await?;
            report.skipped += 1;
            return Ok(());
        }

        let local = self.store.find_transaction_by_ledger_id(&event.biz_id).await?;
        match self.policy.evaluate(event, local.as_ref()) {
            Verdict::Decided(outcome) => {
                match self.store.apply_reconciliation(&outcome, event.id).await {
                    Ok(reconciliation) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_reconciliation(outcome.status.as_str());
                        }
                        info!(
                            biz_id = %reconciliation.biz_id,
                            status = outcome.status.as_str(),
                            block_height = outcome.block_height,
                            tx_hash = %event.tx_hash,
                            "Reconciliation applied"
                        );
                        report.applied += 1;
                    }
                    // Lost a race with another transition
                    Err(CoreError::InvalidState(reason)) => {
                        self.reject(event, &reason, report).await?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Verdict::Defer => {
                debug!(biz_id = %event.biz_id, event_id = event.id, "Reconciliation deferred");
                report.deferred += 1;
            }
            Verdict::Reject(reason) => self.reject(event, &reason, report).await?,
        }
        Ok(())
    }

    async fn reject(&self, event: &EventLog, reason: &str, report: &mut PollReport) -> Result<()> {
        warn!(
            biz_id = %event.biz_id,
            event_id = event.id,
            tx_hash = %event.tx_hash,
            reason = %reason,
            "Reconciliation event rejected"
        );
        self.store.mark_event_processed(event.id).await?;
        report.rejected += 1;
        Ok(())
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// Cancellation is observed between polls and also interrupts a poll
    /// that is in flight. Poll errors are logged and the loop continues.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.poll_once() => {
                    if let Err(e) = result {
                        if let Some(metrics) = &self.metrics {
                            metrics.poll_errors.inc();
                        }
                        error!(error = %e, "Reconciliation poll failed");
                    }
                }
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Run on a Tokio task
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LedgerVerdictPolicy;
    use anchor_core::config::AnchoringConfig;
    use anchor_core::gateway::InMemoryLedger;
    use anchor_core::types::{CreateTransactionRequest, ReconciliationStatus, TxStatus};
    use anchor_core::{AnchorOrchestrator, EncryptionKey, TransactionService};
    use std::time::Duration;

    struct Fixture {
        store: Store,
        ledger: Arc<InMemoryLedger>,
        service: TransactionService,
        orchestrator: AnchorOrchestrator,
    }

    async fn fixture() -> Fixture {
        let store = Store::in_memory().await.unwrap();
        let ledger = Arc::new(InMemoryLedger::new("reconciliation"));
        Fixture {
            service: TransactionService::new(store.clone(), EncryptionKey::from_bytes([5; 32])),
            orchestrator: AnchorOrchestrator::new(
                store.clone(),
                ledger.clone(),
                &AnchoringConfig::default(),
            ),
            store,
            ledger,
        }
    }

    fn listener(f: &Fixture) -> ReconciliationLoop {
        ReconciliationLoop::new(
            f.store.clone(),
            f.ledger.clone(),
            Arc::new(LedgerVerdictPolicy),
            Config {
                poll_interval_ms: 20,
                ..Default::default()
            },
        )
    }

    async fn create(f: &Fixture, biz_id: &str) {
        f.service
            .create_transaction(&CreateTransactionRequest {
                biz_id: biz_id.to_string(),
                institution_id: "INST_A".to_string(),
                amount: "42.00".to_string(),
                sender: "A".to_string(),
                receiver: "B".to_string(),
                tx_type: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_uploaded_events_are_skipped() {
        let f = fixture().await;
        create(&f, "TX001").await;
        f.orchestrator.upload_to_chain("TX001").await.unwrap();

        let report = listener(&f).poll_once().await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.applied, 0);
        assert!(f.store.unprocessed_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mismatch_applied() {
        let f = fixture().await;
        create(&f, "TX001").await;
        f.orchestrator.upload_to_chain("TX001").await.unwrap();
        f.ledger
            .emit_reconciliation("TX001", ReconciliationStatus::Mismatch, "INST_B")
            .unwrap();

        let report = listener(&f).poll_once().await.unwrap();
        assert_eq!(report.applied, 1);

        let tx = f.service.get_transaction("TX001").await.unwrap();
        assert_eq!(tx.status, TxStatus::Mismatch);
        let recon = f.service.get_reconciliation("TX001").await.unwrap();
        assert_eq!(recon.status, ReconciliationStatus::Mismatch);
        assert_eq!(recon.party_b, "INST_B");
    }

    #[tokio::test]
    async fn test_hashed_biz_id_resolved() {
        let f = fixture().await;
        create(&f, "TX001").await;
        f.orchestrator.upload_to_chain("TX001").await.unwrap();

        f.store
            .record_event(&anchor_core::gateway::LedgerEvent {
                event_type: EventType::ReconciliationEvent,
                biz_id: anchor_core::gateway::contract::biz_id_key("TX001"),
                tx_hash: "0xfeed".to_string(),
                block_height: f.ledger.height() + 1,
                ledger_endpoint: "reconciliation".to_string(),
                data: serde_json::json!({ "status": 2, "counterparty": "0xB" }),
            })
            .await
            .unwrap();

        let report = listener(&f).poll_once().await.unwrap();
        assert_eq!(report.applied, 1);
        let recon = f.service.get_reconciliation("TX001").await.unwrap();
        assert_eq!(recon.status, ReconciliationStatus::Matched);
        assert_eq!(recon.party_b, "0xB");
    }

    #[tokio::test]
    async fn test_poll_error_does_not_stop_loop() {
        let f = fixture().await;
        f.ledger.set_unavailable(true);
        let metrics = Metrics::new().unwrap();
        let recon = Arc::new(listener(&f).with_metrics(metrics.clone()));

        assert!(recon.poll_once().await.is_err());

        let shutdown = CancellationToken::new();
        let handle = recon.clone().spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(metrics.poll_errors.get() >= 1);

        f.ledger.set_unavailable(false);
        create(&f, "TX001").await;
        f.orchestrator.upload_to_chain("TX001").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(metrics.events_ingested.get(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
