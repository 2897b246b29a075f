//! Matching policies
//!
//! A policy turns a `ReconciliationEvent` plus the local transaction into a
//! verdict. The loop applies `Decided` outcomes atomically, leaves `Defer`
//! events unprocessed for the next poll and marks `Reject`ed ones processed.

use crate::{Error, Result};
use anchor_core::store::ReconciliationOutcome;
use anchor_core::types::{EventLog, ReconciliationStatus, Transaction, TxStatus};
use serde::Deserialize;
use std::fmt;

/// Outcome of evaluating one event
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Apply this outcome
    Decided(ReconciliationOutcome),
    /// Not ready yet, retry on a later poll
    Defer,
    /// Never applicable
    Reject(String),
}

/// Decides how a ledger reconciliation event affects a local transaction
pub trait MatchPolicy: Send + Sync + fmt::Debug {
    /// Evaluate `event` against the local record, `None` if the BizID is unknown
    fn evaluate(&self, event: &EventLog, local: Option<&Transaction>) -> Verdict;
}

/// Applies the verdict the ledger reports
///
/// The event payload carries `status` (2 matched, 3 mismatch), the
/// `counterparty` and optionally the anchored `data_hash`, which must agree
/// with the local commitment.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerVerdictPolicy;

#[derive(Debug, Deserialize)]
struct ReconciliationPayload {
    status: i32,
    #[serde(default)]
    counterparty: String,
    #[serde(default, alias = "dataHash")]
    data_hash: Option<String>,
}

fn parse_payload(event: &EventLog) -> Result<ReconciliationPayload> {
    serde_json::from_str(&event.data).map_err(|e| Error::MalformedEvent {
        event_id: event.id,
        reason: e.to_string(),
    })
}

impl MatchPolicy for LedgerVerdictPolicy {
    fn evaluate(&self, event: &EventLog, local: Option<&Transaction>) -> Verdict {
        let tx = match local {
            Some(tx) => tx,
            None => return Verdict::Reject(format!("unknown biz_id {}", event.biz_id)),
        };

        match tx.status {
            TxStatus::Pending => return Verdict::Defer,
            TxStatus::Uploaded => {}
            status => return Verdict::Reject(format!("{} already {}", tx.biz_id, status)),
        }

        let payload = match parse_payload(event) {
            Ok(payload) => payload,
            Err(e) => return Verdict::Reject(e.to_string()),
        };

        let status = match ReconciliationStatus::from_i32(payload.status) {
            Some(status) => status,
            None => return Verdict::Reject(format!("unknown verdict status {}", payload.status)),
        };

        if let Some(data_hash) = &payload.data_hash {
            if !data_hash.trim_start_matches("0x").eq_ignore_ascii_case(&tx.data_hash) {
                return Verdict::Reject(format!(
                    "ledger commitment for {} differs from the local record",
                    tx.biz_id
                ));
            }
        }

        Verdict::Decided(ReconciliationOutcome {
            biz_id: tx.biz_id.clone(),
            party_a: tx.institution_id.clone(),
            party_b: payload.counterparty,
            status,
            block_height: event.block_height.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core::gateway::LedgerEvent;
    use anchor_core::types::{CreateTransactionRequest, EventType};
    use anchor_core::{EncryptionKey, Store, TransactionService};
    use serde_json::json;

    async fn fixture() -> (Store, Transaction) {
        let store = Store::in_memory().await.unwrap();
        let service = TransactionService::new(store.clone(), EncryptionKey::from_bytes([9; 32]));
        let tx = service
            .create_transaction(&CreateTransactionRequest {
                biz_id: "TX001".to_string(),
                institution_id: "INST_A".to_string(),
                amount: "100".to_string(),
                sender: "A".to_string(),
                receiver: "B".to_string(),
                tx_type: None,
            })
            .await
            .unwrap();
        (store, tx)
    }

    async fn event(store: &Store, data: serde_json::Value) -> EventLog {
        store
            .record_event(&LedgerEvent {
                event_type: EventType::ReconciliationEvent,
                biz_id: "TX001".to_string(),
                tx_hash: format!("0x{}", data),
                block_height: 7,
                ledger_endpoint: "reconciliation".to_string(),
                data,
            })
            .await
            .unwrap();
        store.unprocessed_events(10).await.unwrap().pop().unwrap()
    }

    fn uploaded(mut tx: Transaction) -> Transaction {
        tx.status = TxStatus::Uploaded;
        tx
    }

    #[tokio::test]
    async fn test_matched_verdict() {
        let (store, tx) = fixture().await;
        let ev = event(
            &store,
            json!({"status": 2, "counterparty": "INST_B", "data_hash": tx.data_hash.to_uppercase()}),
        )
        .await;

        let verdict = LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx)));
        match verdict {
            Verdict::Decided(outcome) => {
                assert_eq!(outcome.status, ReconciliationStatus::Matched);
                assert_eq!(outcome.party_a, "INST_A");
                assert_eq!(outcome.party_b, "INST_B");
                assert_eq!(outcome.block_height, 7);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_contract_payload_accepted() {
        let (store, tx) = fixture().await;
        let ev = event(
            &store,
            json!({"status": 3, "counterparty": "0xB", "dataHash": format!("0x{}", tx.data_hash)}),
        )
        .await;

        match LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx))) {
            Verdict::Decided(outcome) => assert_eq!(outcome.status, ReconciliationStatus::Mismatch),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_is_deferred() {
        let (store, tx) = fixture().await;
        let ev = event(&store, json!({"status": 2})).await;
        assert_eq!(LedgerVerdictPolicy.evaluate(&ev, Some(&tx)), Verdict::Defer);
    }

    #[tokio::test]
    async fn test_rejections() {
        let (store, tx) = fixture().await;

        let ev = event(&store, json!({"status": 2})).await;
        assert!(matches!(LedgerVerdictPolicy.evaluate(&ev, None), Verdict::Reject(_)));

        let mut settled = uploaded(tx.clone());
        settled.status = TxStatus::Mismatch;
        assert!(matches!(
            LedgerVerdictPolicy.evaluate(&ev, Some(&settled)),
            Verdict::Reject(_)
        ));

        let ev = event(&store, json!({"status": 9})).await;
        assert!(matches!(
            LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx.clone()))),
            Verdict::Reject(_)
        ));

        let ev = event(&store, json!({"status": 2, "data_hash": "00"})).await;
        assert!(matches!(
            LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx.clone()))),
            Verdict::Reject(_)
        ));

        let ev = event(&store, json!({"status": 2, "dataHash": "0x00"})).await;
        assert!(matches!(
            LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx.clone()))),
            Verdict::Reject(_)
        ));

        let ev = event(&store, json!({"counterparty": "INST_B"})).await;
        match LedgerVerdictPolicy.evaluate(&ev, Some(&uploaded(tx))) {
            Verdict::Reject(reason) => assert!(reason.contains("Malformed")),
            other => panic!("unexpected verdict {:?}", other),
        }
    }
}
