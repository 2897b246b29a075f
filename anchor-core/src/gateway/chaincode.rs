//! Chaincode style ledger adapter
//!
//! Invoke/query calls against a named chaincode on a channel, relayed by a
//! JSON-RPC gateway. Arguments are passed as strings; batch arguments are
//! JSON-encoded arrays.

use super::rpc::{parse_event_type, parse_quantity, quantity_field, string_field, RpcClient};
use super::{
    check_batch_lengths, BatchReceipt, CommitmentRecord, LedgerEvent, LedgerGateway,
    LedgerReceipt, LedgerStatistics,
};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Chaincode gateway
#[derive(Debug)]
pub struct ChaincodeGateway {
    rpc: RpcClient,
    channel: String,
    chaincode: String,
}

impl ChaincodeGateway {
    /// Adapter for chaincode `config.ledger_endpoint` on `config.channel`
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let rpc = RpcClient::new(
            config.url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )?;
        Ok(Self {
            rpc,
            channel: config.channel.clone(),
            chaincode: config.ledger_endpoint.clone(),
        })
    }

    fn params(&self, function: &str, args: Vec<String>) -> Value {
        json!({
            "channel": self.channel,
            "chaincode": self.chaincode,
            "function": function,
            "args": args,
        })
    }

    async fn invoke(&self, function: &str, args: Vec<String>) -> GatewayResult<Value> {
        self.rpc.call("chaincode_invoke", self.params(function, args)).await
    }

    async fn query(&self, function: &str, args: Vec<String>) -> GatewayResult<Value> {
        self.rpc.call("chaincode_query", self.params(function, args)).await
    }
}

fn receipt_from(value: &Value) -> GatewayResult<LedgerReceipt> {
    Ok(LedgerReceipt {
        tx_hash: string_field(value, "txId"),
        block_height: quantity_field(value, "blockNumber")?,
        block_hash: string_field(value, "blockHash"),
        resource_cost: 0,
    })
}

fn encode_array(values: &[String]) -> GatewayResult<String> {
    serde_json::to_string(values).map_err(|e| GatewayError::Rejected(e.to_string()))
}

#[async_trait]
impl LedgerGateway for ChaincodeGateway {
    fn endpoint(&self) -> &str {
        &self.chaincode
    }

    async fn connect(&self) -> GatewayResult<u64> {
        let value = self.query("QueryBlockHeight", vec![]).await?;
        let height = parse_quantity(&value)?;
        info!(
            url = %self.rpc.url(),
            channel = %self.channel,
            chaincode = %self.chaincode,
            height,
            "Connected to chaincode ledger"
        );
        Ok(height)
    }

    async fn upload_commitment(&self, biz_id: &str, data_hash: &str) -> GatewayResult<LedgerReceipt> {
        let value = self
            .invoke("UploadTransaction", vec![biz_id.to_string(), data_hash.to_string()])
            .await?;
        let receipt = receipt_from(&value)?;
        debug!(biz_id = %biz_id, tx_hash = %receipt.tx_hash, "Commitment invoked");
        Ok(receipt)
    }

    async fn batch_upload_commitments(
        &self,
        biz_ids: &[String],
        data_hashes: &[String],
    ) -> GatewayResult<BatchReceipt> {
        check_batch_lengths(biz_ids, data_hashes)?;

        let value = self
            .invoke(
                "BatchUploadTransactions",
                vec![encode_array(biz_ids)?, encode_array(data_hashes)?],
            )
            .await?;

        let success_count = match value.get("payload") {
            Some(v) => parse_quantity(v)? as usize,
            None => biz_ids.len(),
        };
        Ok(BatchReceipt {
            tx_hash: string_field(&value, "txId"),
            block_height: quantity_field(&value, "blockNumber")?,
            success_count,
        })
    }

    async fn query_commitment(&self, biz_id: &str) -> GatewayResult<CommitmentRecord> {
        let value = self.query("GetTransaction", vec![biz_id.to_string()]).await?;
        if value.is_null() {
            return Err(GatewayError::NotFound(biz_id.to_string()));
        }

        Ok(CommitmentRecord {
            biz_id: biz_id.to_string(),
            data_hash: string_field(&value, "dataHash"),
            uploader: string_field(&value, "uploader"),
            timestamp: quantity_field(&value, "timestamp")? as i64,
            status: quantity_field(&value, "status")? as i32,
            counterparty: string_field(&value, "counterparty"),
            match_height: quantity_field(&value, "matchHeight")?,
            tx_hash: string_field(&value, "txId"),
            block_height: quantity_field(&value, "blockNumber")?,
        })
    }

    async fn query_statistics(&self) -> GatewayResult<LedgerStatistics> {
        let value = self.query("GetStatistics", vec![]).await?;
        Ok(LedgerStatistics {
            total_transactions: quantity_field(&value, "totalTransactions")?,
            total_matched: quantity_field(&value, "totalMatched")?,
            match_rate: quantity_field(&value, "matchRate")?,
            institution_count: quantity_field(&value, "institutionCount")?,
        })
    }

    async fn register_participant(&self, name: &str, address: &str) -> GatewayResult<LedgerReceipt> {
        let value = self
            .invoke("RegisterInstitution", vec![name.to_string(), address.to_string()])
            .await?;
        receipt_from(&value)
    }

    async fn query_participant(&self, address: &str) -> GatewayResult<String> {
        let value = self.query("GetInstitution", vec![address.to_string()]).await?;
        if value.is_null() {
            return Err(GatewayError::NotFound(address.to_string()));
        }
        Ok(string_field(&value, "name"))
    }

    async fn fetch_events(&self, from_height: u64) -> GatewayResult<Vec<LedgerEvent>> {
        let raw: Vec<Value> = self
            .rpc
            .call(
                "chaincode_events",
                json!({
                    "channel": self.channel,
                    "chaincode": self.chaincode,
                    "fromBlock": from_height,
                }),
            )
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        for item in raw {
            let name = string_field(&item, "eventName");
            let Some(event_type) = parse_event_type(&name) else {
                debug!(event = %name, "Skipping unknown chaincode event");
                continue;
            };
            let payload = item.get("payload").cloned().unwrap_or(Value::Null);
            events.push(LedgerEvent {
                event_type,
                biz_id: string_field(&payload, "bizId"),
                tx_hash: string_field(&item, "txId"),
                block_height: quantity_field(&item, "blockNumber")?,
                ledger_endpoint: self.chaincode.clone(),
                data: payload,
            });
        }
        events.sort_by_key(|e| e.block_height);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayKind;
    use crate::types::EventType;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> ChaincodeGateway {
        ChaincodeGateway::new(&GatewayConfig {
            kind: GatewayKind::Chaincode,
            url: server.uri(),
            ledger_endpoint: "reconciliation".to_string(),
            channel: "mychannel".to_string(),
            request_timeout_ms: 2_000,
        })
        .unwrap()
    }

    async fn respond(server: &MockServer, matcher: Value, result: Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(matcher))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_connect_reads_block_height() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({ "method": "chaincode_query", "params": { "function": "QueryBlockHeight" } }),
            json!("128"),
        )
        .await;

        let gateway = gateway_for(&server);
        assert_eq!(gateway.connect().await.unwrap(), 128);
    }

    #[tokio::test]
    async fn test_upload_passes_plain_arguments() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({
                "method": "chaincode_invoke",
                "params": {
                    "channel": "mychannel",
                    "function": "UploadTransaction",
                    "args": ["TX001", "ff"]
                }
            }),
            json!({ "txId": "tx-1", "blockNumber": 9 }),
        )
        .await;

        let gateway = gateway_for(&server);
        let receipt = gateway.upload_commitment("TX001", "ff").await.unwrap();
        assert_eq!(receipt.tx_hash, "tx-1");
        assert_eq!(receipt.block_height, 9);
        assert_eq!(receipt.resource_cost, 0);
    }

    #[tokio::test]
    async fn test_batch_upload_reports_payload_count() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({ "params": { "function": "BatchUploadTransactions" } }),
            json!({ "txId": "tx-2", "blockNumber": 10, "payload": "2" }),
        )
        .await;

        let gateway = gateway_for(&server);
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let hashes = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let receipt = gateway.batch_upload_commitments(&ids, &hashes).await.unwrap();
        assert_eq!(receipt.success_count, 2);
    }

    #[tokio::test]
    async fn test_query_transaction_and_statistics() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({ "params": { "function": "GetTransaction" } }),
            json!({ "bizId": "TX001", "dataHash": "ff", "uploader": "org1", "status": 2, "matchHeight": 12,
                    "txId": "tx-1", "blockNumber": 9 }),
        )
        .await;
        respond(
            &server,
            json!({ "params": { "function": "GetStatistics" } }),
            json!({ "totalTransactions": 4, "totalMatched": 3, "matchRate": 75, "institutionCount": 2 }),
        )
        .await;

        let gateway = gateway_for(&server);
        let record = gateway.query_commitment("TX001").await.unwrap();
        assert_eq!(record.status, 2);
        assert_eq!(record.match_height, 12);
        assert_eq!(record.tx_hash, "tx-1");
        assert_eq!(record.block_height, 9);

        let stats = gateway.query_statistics().await.unwrap();
        assert_eq!(stats.match_rate, 75);
        assert_eq!(stats.institution_count, 2);
    }

    #[tokio::test]
    async fn test_query_participant() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({ "params": { "function": "GetInstitution", "args": ["org1"] } }),
            json!({ "name": "Bank A", "address": "org1" }),
        )
        .await;
        respond(
            &server,
            json!({ "params": { "function": "GetInstitution", "args": ["org9"] } }),
            Value::Null,
        )
        .await;

        let gateway = gateway_for(&server);
        assert_eq!(gateway.query_participant("org1").await.unwrap(), "Bank A");
        assert!(matches!(
            gateway.query_participant("org9").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_events() {
        let server = MockServer::start().await;
        respond(
            &server,
            json!({ "method": "chaincode_events" }),
            json!([
                { "eventName": "InstitutionRegistered", "txId": "t1", "blockNumber": 3,
                  "payload": { "name": "Bank A" } },
                { "eventName": "ReconciliationEvent", "txId": "t2", "blockNumber": 4,
                  "payload": { "bizId": "TX001", "status": 3, "counterparty": "org2" } }
            ]),
        )
        .await;

        let gateway = gateway_for(&server);
        let events = gateway.fetch_events(0).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::InstitutionRegistered);
        assert_eq!(events[0].biz_id, "");
        assert_eq!(events[1].biz_id, "TX001");
        assert_eq!(events[1].ledger_endpoint, "reconciliation");
    }
}
