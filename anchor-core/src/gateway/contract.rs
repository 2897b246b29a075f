//! Smart-contract style ledger adapter
//!
//! Talks to a JSON-RPC gateway in front of an EVM-like chain. State-changing
//! calls go through `contract_send` and return a mined receipt; views go
//! through `contract_call`. BizIDs are keyed on-chain as `0x ++ sha256(biz_id)`,
//! and contract events carry that key in `bizId`. The store resolves it back
//! to the BizID.

use super::rpc::{parse_event_type, parse_quantity, quantity_field, string_field, RpcClient};
use super::{
    check_batch_lengths, BatchReceipt, CommitmentRecord, LedgerEvent, LedgerGateway,
    LedgerReceipt, LedgerStatistics,
};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Contract-call gateway
#[derive(Debug)]
pub struct ContractGateway {
    rpc: RpcClient,
    contract_address: String,
}

impl ContractGateway {
    /// Adapter for `config.ledger_endpoint` behind `config.url`
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let rpc = RpcClient::new(
            config.url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )?;
        Ok(Self {
            rpc,
            contract_address: config.ledger_endpoint.clone(),
        })
    }

    async fn send(&self, function: &str, args: Value) -> GatewayResult<Value> {
        let receipt: Value = self
            .rpc
            .call(
                "contract_send",
                json!({ "to": self.contract_address, "function": function, "args": args }),
            )
            .await?;

        // status 0 means the transaction was mined but reverted
        if receipt.get("status").map(parse_quantity).transpose()? == Some(0) {
            warn!(function = %function, "Contract transaction reverted");
            return Err(GatewayError::Rejected(format!("{} reverted", function)));
        }
        Ok(receipt)
    }

    async fn view(&self, function: &str, args: Value) -> GatewayResult<Value> {
        self.rpc
            .call(
                "contract_call",
                json!({ "to": self.contract_address, "function": function, "args": args }),
            )
            .await
    }
}

/// On-chain key for a BizID
pub fn biz_id_key(biz_id: &str) -> String {
    format!("0x{}", hex::encode(Sha256::digest(biz_id.as_bytes())))
}

fn as_bytes32(hash: &str) -> String {
    if hash.starts_with("0x") {
        hash.to_string()
    } else {
        format!("0x{}", hash)
    }
}

fn receipt_from(value: &Value) -> GatewayResult<LedgerReceipt> {
    Ok(LedgerReceipt {
        tx_hash: string_field(value, "transactionHash"),
        block_height: quantity_field(value, "blockNumber")?,
        block_hash: string_field(value, "blockHash"),
        resource_cost: quantity_field(value, "gasUsed")?,
    })
}

#[async_trait]
impl LedgerGateway for ContractGateway {
    fn endpoint(&self) -> &str {
        &self.contract_address
    }

    async fn connect(&self) -> GatewayResult<u64> {
        let height: Value = self.rpc.call("eth_blockNumber", json!([])).await?;
        let height = parse_quantity(&height)?;
        info!(url = %self.rpc.url(), contract = %self.contract_address, height, "Connected to contract ledger");
        Ok(height)
    }

    async fn upload_commitment(&self, biz_id: &str, data_hash: &str) -> GatewayResult<LedgerReceipt> {
        let value = self
            .send("uploadTransaction", json!([biz_id_key(biz_id), as_bytes32(data_hash)]))
            .await?;
        let receipt = receipt_from(&value)?;
        debug!(biz_id = %biz_id, tx_hash = %receipt.tx_hash, block_height = receipt.block_height, "Commitment sent");
        Ok(receipt)
    }

    async fn batch_upload_commitments(
        &self,
        biz_ids: &[String],
        data_hashes: &[String],
    ) -> GatewayResult<BatchReceipt> {
        check_batch_lengths(biz_ids, data_hashes)?;

        let keys: Vec<String> = biz_ids.iter().map(|id| biz_id_key(id)).collect();
        let hashes: Vec<String> = data_hashes.iter().map(|h| as_bytes32(h)).collect();
        let value = self
            .send("batchUploadTransactions", json!([keys, hashes]))
            .await?;

        let success_count = match value.get("returnValue") {
            Some(v) => parse_quantity(v)? as usize,
            None => biz_ids.len(),
        };
        Ok(BatchReceipt {
            tx_hash: string_field(&value, "transactionHash"),
            block_height: quantity_field(&value, "blockNumber")?,
            success_count,
        })
    }

    async fn query_commitment(&self, biz_id: &str) -> GatewayResult<CommitmentRecord> {
        let value = self.view("getTransaction", json!([biz_id_key(biz_id)])).await?;

        let data_hash = string_field(&value, "dataHash");
        if data_hash.is_empty() || data_hash == ZERO_HASH {
            return Err(GatewayError::NotFound(biz_id.to_string()));
        }

        Ok(CommitmentRecord {
            biz_id: biz_id.to_string(),
            data_hash: data_hash.trim_start_matches("0x").to_string(),
            uploader: string_field(&value, "uploader"),
            timestamp: quantity_field(&value, "timestamp")? as i64,
            status: quantity_field(&value, "status")? as i32,
            counterparty: string_field(&value, "counterparty"),
            match_height: quantity_field(&value, "matchHeight")?,
            tx_hash: string_field(&value, "txHash"),
            block_height: quantity_field(&value, "blockHeight")?,
        })
    }

    async fn query_statistics(&self) -> GatewayResult<LedgerStatistics> {
        let value = self.view("getStatistics", json!([])).await?;
        Ok(LedgerStatistics {
            total_transactions: quantity_field(&value, "totalTx")?,
            total_matched: quantity_field(&value, "totalMatched")?,
            match_rate: quantity_field(&value, "matchRate")?,
            institution_count: quantity_field(&value, "institutionCount")?,
        })
    }

    async fn register_participant(&self, name: &str, address: &str) -> GatewayResult<LedgerReceipt> {
        let value = self.send("registerInstitution", json!([name, address])).await?;
        receipt_from(&value)
    }

    async fn query_participant(&self, address: &str) -> GatewayResult<String> {
        let value = self.view("getInstitution", json!([address])).await?;
        if value.get("isRegistered").and_then(Value::as_bool) != Some(true) {
            return Err(GatewayError::NotFound(address.to_string()));
        }
        Ok(string_field(&value, "name"))
    }

    async fn fetch_events(&self, from_height: u64) -> GatewayResult<Vec<LedgerEvent>> {
        let logs: Vec<Value> = self
            .rpc
            .call(
                "contract_events",
                json!({ "address": self.contract_address, "fromBlock": format!("0x{:x}", from_height) }),
            )
            .await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let name = string_field(&log, "event");
            let Some(event_type) = parse_event_type(&name) else {
                debug!(event = %name, "Skipping unknown contract event");
                continue;
            };
            let args = log.get("args").cloned().unwrap_or(Value::Null);
            events.push(LedgerEvent {
                event_type,
                biz_id: string_field(&args, "bizId"),
                tx_hash: string_field(&log, "transactionHash"),
                block_height: quantity_field(&log, "blockNumber")?,
                ledger_endpoint: self.contract_address.clone(),
                data: args,
            });
        }
        events.sort_by_key(|e| e.block_height);
        Ok(events)
    }
}
