//! Core types for the anchoring engine
//!
//! Persisted entities map 1:1 onto store rows (`sqlx::FromRow`). Status
//! discriminants are stable integers shared with the ledger side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction lifecycle status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
pub enum TxStatus {
    /// Created, not yet anchored
    Pending = 0,
    /// Commitment anchored on the ledger
    Uploaded = 1,
    /// Counterparty commitment matched
    Matched = 2,
    /// Counterparty commitment did not match
    Mismatch = 3,
}

impl TxStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Matched | TxStatus::Mismatch)
    }

    /// Integer discriminant as persisted
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse from the persisted discriminant
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TxStatus::Pending),
            1 => Some(TxStatus::Uploaded),
            2 => Some(TxStatus::Matched),
            3 => Some(TxStatus::Mismatch),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Uploaded => "uploaded",
            TxStatus::Matched => "matched",
            TxStatus::Mismatch => "mismatch",
        };
        f.write_str(s)
    }
}

/// Chain receipt status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
pub enum ReceiptStatus {
    /// Ledger reported failure
    Failed = 0,
    /// Ledger reported success
    Success = 1,
}

/// Final reconciliation outcome
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
pub enum ReconciliationStatus {
    /// Both sides agree
    Matched = 2,
    /// Sides disagree
    Mismatch = 3,
}

impl ReconciliationStatus {
    /// Parse from the ledger-side discriminant
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            2 => Some(ReconciliationStatus::Matched),
            3 => Some(ReconciliationStatus::Mismatch),
            _ => None,
        }
    }

    /// Outcome label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Matched => "matched",
            ReconciliationStatus::Mismatch => "mismatch",
        }
    }
}

impl From<ReconciliationStatus> for TxStatus {
    fn from(status: ReconciliationStatus) -> Self {
        match status {
            ReconciliationStatus::Matched => TxStatus::Matched,
            ReconciliationStatus::Mismatch => TxStatus::Mismatch,
        }
    }
}

/// Institution status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[repr(i32)]
pub enum InstitutionStatus {
    /// Not allowed to transact
    Disabled = 0,
    /// Active participant
    Enabled = 1,
}

/// Per-record commitment salt
///
/// Written once at creation. Not serialized, redacted in `Debug`, and only
/// readable inside this crate.
#[derive(Clone, PartialEq, Eq, Default, sqlx::Type)]
#[sqlx(transparent)]
pub struct Salt(String);

impl Salt {
    pub(crate) fn new(value: String) -> Self {
        Self(value)
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(***)")
    }
}

/// Anchored transaction record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    /// Row id
    pub id: i64,
    /// Business identifier (unique)
    pub biz_id: String,
    /// Owning institution
    pub institution_id: String,
    /// hex(IV || AES-256-CBC blocks) of the amount
    pub amount_cipher: String,
    /// SHA-256 hex of the plaintext amount
    pub amount_hash: String,
    /// Commitment: SHA-256(biz_id ++ amount ++ salt)
    pub data_hash: String,
    #[serde(skip)]
    pub(crate) salt: Salt,
    /// Paying party
    pub sender: String,
    /// Receiving party
    pub receiver: String,
    /// Transaction type code
    pub tx_type: i32,
    /// Lifecycle status
    pub status: TxStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Ledger receipt for an anchored commitment
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChainReceipt {
    /// Row id
    pub id: i64,
    /// Business identifier
    pub biz_id: String,
    /// Ledger transaction hash
    pub tx_hash: String,
    /// Block height
    pub block_height: i64,
    /// Block hash
    pub block_hash: String,
    /// Contract address or chaincode id
    #[serde(alias = "contract_address")]
    pub ledger_endpoint: String,
    /// Gas or compute units consumed
    #[serde(alias = "gas_used")]
    pub resource_cost: i64,
    /// Receipt status
    pub status: ReceiptStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Reconciliation outcome for one transaction
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reconciliation {
    /// Row id
    pub id: i64,
    /// Business identifier
    pub biz_id: String,
    /// Uploading institution
    pub party_a: String,
    /// Counterparty
    pub party_b: String,
    /// Outcome
    pub status: ReconciliationStatus,
    /// Time the outcome was applied
    pub matched_at: DateTime<Utc>,
    /// Block height of the deciding event
    pub block_height: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Participating institution
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Institution {
    /// Row id
    pub id: i64,
    /// Institution identifier (unique)
    pub institution_id: String,
    /// Display name
    pub name: String,
    /// Ledger address (unique)
    pub ledger_address: String,
    /// Status
    pub status: InstitutionStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Ledger event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum EventType {
    /// A commitment was anchored
    DataUploaded,
    /// The ledger decided a reconciliation outcome
    ReconciliationEvent,
    /// An institution joined
    InstitutionRegistered,
}

impl EventType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DataUploaded => "DataUploaded",
            EventType::ReconciliationEvent => "ReconciliationEvent",
            EventType::InstitutionRegistered => "InstitutionRegistered",
        }
    }
}

/// Raw ledger event as observed and persisted
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventLog {
    /// Row id
    pub id: i64,
    /// Event kind
    pub event_type: EventType,
    /// Business identifier (empty for institution events)
    pub biz_id: String,
    /// Ledger transaction hash
    pub tx_hash: String,
    /// Block height
    pub block_height: i64,
    /// Emitting contract / chaincode
    pub ledger_endpoint: String,
    /// Opaque JSON payload
    pub data: String,
    /// Applied by the reconciliation loop
    pub processed: bool,
    /// Ingestion time
    pub created_at: DateTime<Utc>,
}

/// Client request to create a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    /// Business identifier
    pub biz_id: String,
    /// Owning institution
    pub institution_id: String,
    /// Decimal amount, kept verbatim
    pub amount: String,
    /// Paying party
    pub sender: String,
    /// Receiving party
    pub receiver: String,
    /// Transaction type (default 1)
    #[serde(default)]
    pub tx_type: Option<i32>,
}

/// Client request to register an institution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInstitutionRequest {
    /// Institution identifier
    pub institution_id: String,
    /// Display name
    pub name: String,
    /// Ledger address
    pub ledger_address: String,
}

/// Outcome of a batch upload
///
/// `success_ids` and `failed_ids` partition the de-duplicated input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUploadResult {
    /// Distinct ids attempted
    pub total: usize,
    /// Anchored count
    pub success: usize,
    /// Failed count
    pub failed: usize,
    /// Anchored ids
    pub success_ids: Vec<String>,
    /// Failed ids
    pub failed_ids: Vec<String>,
}

/// Local transaction statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// All transactions
    pub total: i64,
    /// Pending count
    pub pending: i64,
    /// Uploaded count
    pub uploaded: i64,
    /// Matched count
    pub matched: i64,
    /// Mismatch count
    pub mismatch: i64,
    /// matched / total, in percent
    pub match_rate: f64,
}

/// Listing filter for transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Restrict to one institution
    pub institution_id: Option<String>,
    /// Restrict to one status
    pub status: Option<TxStatus>,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub page_size: u32,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            institution_id: None,
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows on this page
    pub items: Vec<T>,
    /// Total matching rows
    pub total: i64,
    /// 1-based page
    pub page: u32,
    /// Page size
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_status_discriminants() {
        assert_eq!(TxStatus::Pending.as_i32(), 0);
        assert_eq!(TxStatus::Uploaded.as_i32(), 1);
        assert_eq!(TxStatus::Matched.as_i32(), 2);
        assert_eq!(TxStatus::Mismatch.as_i32(), 3);
        assert_eq!(TxStatus::from_i32(4), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Uploaded.is_terminal());
        assert!(TxStatus::Matched.is_terminal());
        assert!(TxStatus::Mismatch.is_terminal());
    }

    #[test]
    fn test_reconciliation_status_maps_to_tx_status() {
        assert_eq!(ReconciliationStatus::from_i32(1), None);
        let status = ReconciliationStatus::from_i32(3).unwrap();
        assert_eq!(TxStatus::from(status), TxStatus::Mismatch);
    }

    #[test]
    fn test_salt_is_redacted_and_not_serialized() {
        let now = Utc::now();
        let tx = Transaction {
            id: 1,
            biz_id: "TX001".to_string(),
            institution_id: "INST001".to_string(),
            amount_cipher: String::new(),
            amount_hash: String::new(),
            data_hash: String::new(),
            salt: Salt::new("deadbeefdeadbeef".to_string()),
            sender: "A".to_string(),
            receiver: "B".to_string(),
            tx_type: 1,
            status: TxStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        assert!(!format!("{:?}", tx).contains("deadbeef"));
        let json = serde_json::to_string(&tx).unwrap();
        assert!(!json.contains("deadbeef"));
        assert!(!json.contains("salt"));
    }

    #[test]
    fn test_receipt_accepts_contract_aliases() {
        let json = r#"{
            "id": 1, "biz_id": "TX001", "tx_hash": "0xabc", "block_height": 7,
            "block_hash": "0xdef", "contract_address": "0x1234", "gas_used": 21000,
            "status": "Success", "created_at": "2026-01-13T00:00:00Z"
        }"#;
        let receipt: ChainReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.ledger_endpoint, "0x1234");
        assert_eq!(receipt.resource_cost, 21000);
    }
}
