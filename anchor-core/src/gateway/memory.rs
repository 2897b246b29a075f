//! Simulated in-process ledger
//!
//! Behaves like a single-node chain: every accepted submission mines a new
//! block and emits an event. Failures can be injected per BizID or globally.

use super::{
    check_batch_lengths, BatchReceipt, CommitmentRecord, LedgerEvent, LedgerGateway,
    LedgerReceipt, LedgerStatistics,
};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{EventType, ReconciliationStatus};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Address the simulated ledger attributes uploads to
pub const LOCAL_UPLOADER: &str = "local";

/// In-memory ledger with failure injection
#[derive(Debug)]
pub struct InMemoryLedger {
    endpoint: String,
    latency: Duration,
    state: RwLock<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    height: u64,
    records: HashMap<String, CommitmentRecord>,
    participants: HashMap<String, String>,
    events: Vec<LedgerEvent>,
    fail_for: HashSet<String>,
    unavailable: bool,
}

impl LedgerState {
    fn mine(&mut self, payload: &str) -> LedgerReceipt {
        self.height += 1;
        let tx_hash = format!(
            "0x{}",
            hex::encode(Sha256::digest(format!("{}:{}", self.height, payload)))
        );
        let block_hash = format!(
            "0x{}",
            hex::encode(Sha256::digest(format!("block:{}", self.height)))
        );
        LedgerReceipt {
            tx_hash,
            block_height: self.height,
            block_hash,
            resource_cost: 21_000,
        }
    }
}

impl InMemoryLedger {
    /// Empty ledger at height 0
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            latency: Duration::ZERO,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make uploads of `biz_id` fail with `Unavailable`
    pub fn fail_for(&self, biz_id: impl Into<String>) {
        self.state.write().fail_for.insert(biz_id.into());
    }

    /// Remove all per-BizID failures
    pub fn clear_failures(&self) {
        self.state.write().fail_for.clear();
    }

    /// Toggle global unavailability
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Current block height
    pub fn height(&self) -> u64 {
        self.state.read().height
    }

    /// Number of anchored commitments
    pub fn record_count(&self) -> usize {
        self.state.read().records.len()
    }

    /// Record a counterparty verdict for an anchored commitment
    ///
    /// Mines a block carrying a `ReconciliationEvent` and returns it.
    pub fn emit_reconciliation(
        &self,
        biz_id: &str,
        status: ReconciliationStatus,
        counterparty: &str,
    ) -> GatewayResult<LedgerEvent> {
        let mut state = self.state.write();

        let (uploader, data_hash) = match state.records.get(biz_id) {
            Some(record) => (record.uploader.clone(), record.data_hash.clone()),
            None => return Err(GatewayError::NotFound(biz_id.to_string())),
        };

        let receipt = state.mine(&format!("reconcile:{}", biz_id));
        if let Some(record) = state.records.get_mut(biz_id) {
            record.status = status as i32;
            record.counterparty = counterparty.to_string();
            record.match_height = receipt.block_height;
        }

        let event = LedgerEvent {
            event_type: EventType::ReconciliationEvent,
            biz_id: biz_id.to_string(),
            tx_hash: receipt.tx_hash,
            block_height: receipt.block_height,
            ledger_endpoint: self.endpoint.clone(),
            data: serde_json::json!({
                "status": status as i32,
                "uploader": uploader,
                "counterparty": counterparty,
                "data_hash": data_hash,
                "block_height": receipt.block_height,
            }),
        };
        state.events.push(event.clone());

        debug!(biz_id = %biz_id, status = status.as_str(), "Reconciliation event emitted");
        Ok(event)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn check_available(&self) -> GatewayResult<()> {
        if self.state.read().unavailable {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn anchor(state: &mut LedgerState, endpoint: &str, biz_id: &str, data_hash: &str) -> GatewayResult<LedgerReceipt> {
        if state.fail_for.contains(biz_id) {
            warn!(biz_id = %biz_id, "Simulated upload failure");
            return Err(GatewayError::Unavailable(format!("simulated failure for {}", biz_id)));
        }
        if state.records.contains_key(biz_id) {
            return Err(GatewayError::Rejected(format!("{} already anchored", biz_id)));
        }

        let receipt = state.mine(&format!("upload:{}:{}", biz_id, data_hash));
        state.records.insert(
            biz_id.to_string(),
            CommitmentRecord {
                biz_id: biz_id.to_string(),
                data_hash: data_hash.to_string(),
                uploader: LOCAL_UPLOADER.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
                status: 1,
                counterparty: String::new(),
                match_height: 0,
                tx_hash: receipt.tx_hash.clone(),
                block_height: receipt.block_height,
            },
        );
        state.events.push(LedgerEvent {
            event_type: EventType::DataUploaded,
            biz_id: biz_id.to_string(),
            tx_hash: receipt.tx_hash.clone(),
            block_height: receipt.block_height,
            ledger_endpoint: endpoint.to_string(),
            data: serde_json::json!({
                "data_hash": data_hash,
                "uploader": LOCAL_UPLOADER,
            }),
        });
        Ok(receipt)
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> GatewayResult<u64> {
        self.simulate_latency().await;
        self.check_available()?;
        Ok(self.height())
    }

    async fn upload_commitment(&self, biz_id: &str, data_hash: &str) -> GatewayResult<LedgerReceipt> {
        self.simulate_latency().await;
        self.check_available()?;

        let mut state = self.state.write();
        let receipt = Self::anchor(&mut state, &self.endpoint, biz_id, data_hash)?;
        debug!(biz_id = %biz_id, block_height = receipt.block_height, "Commitment anchored");
        Ok(receipt)
    }

    async fn batch_upload_commitments(
        &self,
        biz_ids: &[String],
        data_hashes: &[String],
    ) -> GatewayResult<BatchReceipt> {
        check_batch_lengths(biz_ids, data_hashes)?;
        self.simulate_latency().await;
        self.check_available()?;

        let mut state = self.state.write();
        let mut success_count = 0;
        let mut last = None;
        for (biz_id, data_hash) in biz_ids.iter().zip(data_hashes) {
            match Self::anchor(&mut state, &self.endpoint, biz_id, data_hash) {
                Ok(receipt) => {
                    success_count += 1;
                    last = Some(receipt);
                }
                Err(e) => debug!(biz_id = %biz_id, error = %e, "Batch entry skipped"),
            }
        }

        let (tx_hash, block_height) = match last {
            Some(receipt) => (receipt.tx_hash, receipt.block_height),
            None => (String::new(), state.height),
        };
        Ok(BatchReceipt {
            tx_hash,
            block_height,
            success_count,
        })
    }

    async fn query_commitment(&self, biz_id: &str) -> GatewayResult<CommitmentRecord> {
        self.simulate_latency().await;
        self.check_available()?;
        self.state
            .read()
            .records
            .get(biz_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(biz_id.to_string()))
    }

    async fn query_statistics(&self) -> GatewayResult<LedgerStatistics> {
        self.simulate_latency().await;
        self.check_available()?;

        let state = self.state.read();
        let total = state.records.len() as u64;
        let matched = state
            .records
            .values()
            .filter(|r| r.status == ReconciliationStatus::Matched as i32)
            .count() as u64;
        Ok(LedgerStatistics {
            total_transactions: total,
            total_matched: matched,
            match_rate: if total > 0 { matched * 100 / total } else { 0 },
            institution_count: state.participants.len() as u64,
        })
    }

    async fn register_participant(&self, name: &str, address: &str) -> GatewayResult<LedgerReceipt> {
        self.simulate_latency().await;
        self.check_available()?;

        let mut state = self.state.write();
        if state.participants.contains_key(address) {
            return Err(GatewayError::Rejected(format!("{} already registered", address)));
        }
        state.participants.insert(address.to_string(), name.to_string());

        let receipt = state.mine(&format!("register:{}", address));
        state.events.push(LedgerEvent {
            event_type: EventType::InstitutionRegistered,
            biz_id: String::new(),
            tx_hash: receipt.tx_hash.clone(),
            block_height: receipt.block_height,
            ledger_endpoint: self.endpoint.clone(),
            data: serde_json::json!({ "name": name, "address": address }),
        });
        Ok(receipt)
    }

    async fn query_participant(&self, address: &str) -> GatewayResult<String> {
        self.simulate_latency().await;
        self.check_available()?;
        self.state
            .read()
            .participants
            .get(address)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(address.to_string()))
    }

    async fn fetch_events(&self, from_height: u64) -> GatewayResult<Vec<LedgerEvent>> {
        self.simulate_latency().await;
        self.check_available()?;
        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.block_height >= from_height)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_advances_height() {
        let ledger = InMemoryLedger::new("recon");
        assert_eq!(ledger.connect().await.unwrap(), 0);

        let r1 = ledger.upload_commitment("TX001", "aa").await.unwrap();
        let r2 = ledger.upload_commitment("TX002", "bb").await.unwrap();
        assert_eq!(r1.block_height, 1);
        assert_eq!(r2.block_height, 2);
        assert_ne!(r1.tx_hash, r2.tx_hash);
        assert!(r1.tx_hash.starts_with("0x"));

        let record = ledger.query_commitment("TX001").await.unwrap();
        assert_eq!(record.data_hash, "aa");
    }

    #[tokio::test]
    async fn test_duplicate_upload_rejected() {
        let ledger = InMemoryLedger::new("recon");
        ledger.upload_commitment("TX001", "aa").await.unwrap();
        assert!(matches!(
            ledger.upload_commitment("TX001", "aa").await,
            Err(GatewayError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ledger = InMemoryLedger::new("recon");
        ledger.fail_for("TX002");
        assert!(ledger.upload_commitment("TX001", "aa").await.is_ok());
        assert!(matches!(
            ledger.upload_commitment("TX002", "bb").await,
            Err(GatewayError::Unavailable(_))
        ));

        ledger.set_unavailable(true);
        assert!(matches!(ledger.connect().await, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_batch_upload() {
        let ledger = InMemoryLedger::new("recon");
        ledger.fail_for("B");
        let ids: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let hashes: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();

        let receipt = ledger.batch_upload_commitments(&ids, &hashes).await.unwrap();
        assert_eq!(receipt.success_count, 2);
        assert!(matches!(
            ledger.query_commitment("B").await,
            Err(GatewayError::NotFound(_))
        ));

        // already anchored entries are skipped, the rest still land
        ledger.clear_failures();
        let receipt = ledger.batch_upload_commitments(&ids, &hashes).await.unwrap();
        assert_eq!(receipt.success_count, 1);
        assert_eq!(ledger.record_count(), 3);
        assert_eq!(ledger.query_commitment("A").await.unwrap().data_hash, "1");

        assert!(matches!(
            ledger.batch_upload_commitments(&ids, &hashes[..1]).await,
            Err(GatewayError::LengthMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_from_height() {
        let ledger = InMemoryLedger::new("recon");
        ledger.upload_commitment("TX001", "aa").await.unwrap();
        ledger.upload_commitment("TX002", "bb").await.unwrap();
        ledger
            .emit_reconciliation("TX001", ReconciliationStatus::Matched, "bank-b")
            .unwrap();

        let all = ledger.fetch_events(0).await.unwrap();
        assert_eq!(all.len(), 3);

        let tail = ledger.fetch_events(3).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, EventType::ReconciliationEvent);
        assert_eq!(tail[0].data["status"], 2);
        assert_eq!(tail[0].data["data_hash"], "aa");

        let stats = ledger.query_statistics().await.unwrap();
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.total_matched, 1);
        assert_eq!(stats.match_rate, 50);
    }

    #[tokio::test]
    async fn test_query_participant() {
        let ledger = InMemoryLedger::new("recon");
        ledger.register_participant("Bank A", "0xA").await.unwrap();
        assert_eq!(ledger.query_participant("0xA").await.unwrap(), "Bank A");
        assert!(matches!(
            ledger.query_participant("0xB").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_unknown_commitment() {
        let ledger = InMemoryLedger::new("recon");
        assert!(matches!(
            ledger.emit_reconciliation("NOPE", ReconciliationStatus::Mismatch, "x"),
            Err(GatewayError::NotFound(_))
        ));
    }
}
