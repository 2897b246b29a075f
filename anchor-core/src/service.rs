//! Client-facing transaction operations
//!
//! Creation, queries, audit decryption, CSV import and institution
//! administration. Status transitions past Pending are not reachable from
//! here; uploads go through [`crate::AnchorOrchestrator`] and verdicts through
//! the reconciliation loop.

use crate::commitment::{
    amount_digest, compute_commitment, decrypt_amount, encrypt_amount, generate_salt,
    verify_amount_digest, verify_commitment,
};
use crate::import::{parse_csv, ImportReport, RowRejection};
use crate::keys::EncryptionKey;
use crate::store::NewTransaction;
use crate::types::{
    ChainReceipt, CreateTransactionRequest, Institution, InstitutionStatus, Page,
    Reconciliation, Salt, Statistics, Transaction, TransactionFilter,
};
use crate::{Error, Metrics, Result, Store};
use rust_decimal::Decimal;
use std::io::Read;
use std::str::FromStr;
use tracing::{info, warn};

/// Maximum BizID length
pub const MAX_BIZ_ID_LEN: usize = 64;

/// Transaction service
#[derive(Debug, Clone)]
pub struct TransactionService {
    store: Store,
    key: EncryptionKey,
    metrics: Option<Metrics>,
}

impl TransactionService {
    /// Service over `store`, encrypting amounts with `key`
    pub fn new(store: Store, key: EncryptionKey) -> Self {
        Self {
            store,
            key,
            metrics: None,
        }
    }

    /// Count created transactions
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create a Pending transaction with a fresh salt and commitment
    pub async fn create_transaction(&self, request: &CreateTransactionRequest) -> Result<Transaction> {
        validate_request(request)?;

        let salt = generate_salt();
        let data_hash = compute_commitment(&request.biz_id, &request.amount, &salt);
        let amount_cipher = encrypt_amount(self.key.as_bytes(), &request.amount)?;

        let new = NewTransaction {
            biz_id: request.biz_id.clone(),
            institution_id: request.institution_id.clone(),
            amount_cipher,
            amount_hash: amount_digest(&request.amount),
            data_hash,
            salt: Salt::new(salt),
            sender: request.sender.clone(),
            receiver: request.receiver.clone(),
            tx_type: request.tx_type.unwrap_or(crate::import::DEFAULT_TX_TYPE),
        };

        let tx = self.store.insert_transaction(&new).await?;
        if let Some(metrics) = &self.metrics {
            metrics.transactions_created.inc();
        }
        info!(
            biz_id = %tx.biz_id,
            institution_id = %tx.institution_id,
            "Transaction created"
        );
        Ok(tx)
    }

    /// Transaction by BizID
    pub async fn get_transaction(&self, biz_id: &str) -> Result<Transaction> {
        self.store.get_transaction(biz_id).await
    }

    /// Filtered page of transactions, newest first
    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Page<Transaction>> {
        self.store.list_transactions(filter).await
    }

    /// Status counts and match rate, optionally for one institution
    pub async fn statistics(&self, institution_id: Option<&str>) -> Result<Statistics> {
        self.store.statistics(institution_id).await
    }

    /// Decrypt the stored amount for audit
    ///
    /// Fails with `IntegrityCheck` if the plaintext does not match the
    /// recorded amount digest.
    pub async fn decrypt_amount(&self, biz_id: &str) -> Result<String> {
        let tx = self.store.get_transaction(biz_id).await?;
        let amount = decrypt_amount(self.key.as_bytes(), &tx.amount_cipher)?;

        if let Err(e) = verify_amount_digest(&amount, &tx.amount_hash) {
            warn!(biz_id = %biz_id, "Decrypted amount does not match its digest");
            return Err(e.into());
        }
        Ok(amount)
    }

    /// Check a claimed amount against the stored commitment
    pub async fn verify_amount(&self, biz_id: &str, amount: &str) -> Result<bool> {
        let tx = self.store.get_transaction(biz_id).await?;
        Ok(verify_commitment(
            &tx.biz_id,
            amount,
            tx.salt.expose(),
            &tx.data_hash,
        ))
    }

    /// Chain receipt of an anchored transaction
    pub async fn get_receipt(&self, biz_id: &str) -> Result<ChainReceipt> {
        self.store.get_receipt(biz_id).await
    }

    /// Reconciliation outcome of a transaction
    pub async fn get_reconciliation(&self, biz_id: &str) -> Result<Reconciliation> {
        self.store.get_reconciliation(biz_id).await
    }

    /// Create transactions from CSV rows, owned by `institution_id`
    pub async fn import_csv<R: Read>(&self, reader: R, institution_id: &str) -> Result<ImportReport> {
        let (rows, rejected) = parse_csv(reader)?;

        let mut report = ImportReport {
            total: rows.len() + rejected.len(),
            ..Default::default()
        };
        for rejection in rejected {
            report.reject(rejection);
        }

        for row in rows {
            let request = CreateTransactionRequest {
                biz_id: row.biz_id.clone(),
                institution_id: institution_id.to_string(),
                amount: row.amount,
                sender: row.sender,
                receiver: row.receiver,
                tx_type: Some(row.tx_type),
            };
            match self.create_transaction(&request).await {
                Ok(tx) => report.accept(tx.biz_id),
                Err(e) => report.reject(RowRejection {
                    row: row.row,
                    biz_id: row.biz_id,
                    reason: e.to_string(),
                }),
            }
        }
        report.rejected.sort_by_key(|r| r.row);

        info!(
            institution_id = %institution_id,
            total = report.total,
            success = report.success,
            failed = report.failed,
            "CSV import finished"
        );
        Ok(report)
    }

    /// Institution by id
    pub async fn get_institution(&self, institution_id: &str) -> Result<Institution> {
        self.store.get_institution(institution_id).await
    }

    /// All institutions
    pub async fn list_institutions(&self) -> Result<Vec<Institution>> {
        self.store.list_institutions().await
    }

    /// Re-enable an institution
    pub async fn enable_institution(&self, institution_id: &str) -> Result<Institution> {
        self.store
            .set_institution_status(institution_id, InstitutionStatus::Enabled)
            .await
    }

    /// Disable an institution
    pub async fn disable_institution(&self, institution_id: &str) -> Result<Institution> {
        self.store
            .set_institution_status(institution_id, InstitutionStatus::Disabled)
            .await
    }
}

fn validate_request(request: &CreateTransactionRequest) -> Result<()> {
    for (field, value) in [
        ("biz_id", &request.biz_id),
        ("institution_id", &request.institution_id),
        ("amount", &request.amount),
        ("sender", &request.sender),
        ("receiver", &request.receiver),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{} is required", field)));
        }
    }

    if request.biz_id.chars().count() > MAX_BIZ_ID_LEN {
        return Err(Error::Validation(format!(
            "biz_id longer than {} characters",
            MAX_BIZ_ID_LEN
        )));
    }

    let amount = Decimal::from_str(&request.amount)
        .map_err(|_| Error::Validation(format!("amount is not a decimal: {}", request.amount)))?;
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "amount must be positive: {}",
            request.amount
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CryptoError;

    fn request(biz_id: &str, amount: &str) -> CreateTransactionRequest {
        CreateTransactionRequest {
            biz_id: biz_id.to_string(),
            institution_id: "INST001".to_string(),
            amount: amount.to_string(),
            sender: "Bank A".to_string(),
            receiver: "Bank B".to_string(),
            tx_type: None,
        }
    }

    async fn service() -> TransactionService {
        let store = Store::in_memory().await.unwrap();
        TransactionService::new(store, EncryptionKey::from_bytes([3u8; 32]))
    }

    #[tokio::test]
    async fn test_create_transaction() {
        let service = service().await;
        let tx = service.create_transaction(&request("TX001", "1000.50")).await.unwrap();

        assert_eq!(tx.tx_type, 1);
        assert_eq!(tx.data_hash.len(), 64);
        assert_eq!(tx.amount_hash, amount_digest("1000.50"));
        assert!(!tx.amount_cipher.contains("1000"));
        assert!(verify_commitment("TX001", "1000.50", tx.salt.expose(), &tx.data_hash));

        assert_eq!(service.decrypt_amount("TX001").await.unwrap(), "1000.50");
        assert!(service.verify_amount("TX001", "1000.50").await.unwrap());
        assert!(!service.verify_amount("TX001", "1000.51").await.unwrap());
    }

    #[tokio::test]
    async fn test_validation() {
        let service = service().await;
        for bad in [
            request("", "1"),
            request("TX001", "abc"),
            request("TX001", "0"),
            request("TX001", "-5"),
            request(&"X".repeat(65), "1"),
        ] {
            assert!(matches!(
                service.create_transaction(&bad).await,
                Err(Error::Validation(_))
            ));
        }
        assert_eq!(service.statistics(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_salts_differ_per_transaction() {
        let service = service().await;
        let a = service.create_transaction(&request("TX001", "100")).await.unwrap();
        let b = service.create_transaction(&request("TX002", "100")).await.unwrap();
        assert_ne!(a.salt, b.salt);
    }

    #[tokio::test]
    async fn test_tampered_cipher_with_wrong_digest() {
        let service = service().await;
        service.create_transaction(&request("TX001", "100")).await.unwrap();

        // valid ciphertext of a different amount
        let forged = encrypt_amount(&[3u8; 32], "999").unwrap();
        sqlx::query("UPDATE transactions SET amount_cipher = ? WHERE biz_id = 'TX001'")
            .bind(forged)
            .execute(service.store.pool())
            .await
            .unwrap();

        assert!(matches!(
            service.decrypt_amount("TX001").await,
            Err(Error::Crypto(CryptoError::IntegrityCheck))
        ));
    }

    #[tokio::test]
    async fn test_import_csv() {
        let service = service().await;
        service.create_transaction(&request("TX003", "1")).await.unwrap();

        let data = "业务流水号,金额,付款方,收款方,交易类型\n\
                    TX001,100,A,B,1\n\
                    TX002,-1,A,B,1\n\
                    TX003,300,A,B,1\n\
                    TX004,,A,B,1\n\
                    TX005,500,A,B,2\n";
        let report = service.import_csv(data.as_bytes(), "INST009").await.unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.success, 2);
        assert_eq!(report.failed, 3);
        assert_eq!(report.success_ids, vec!["TX001".to_string(), "TX005".to_string()]);
        let rows: Vec<usize> = report.rejected.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![3, 4, 5]);
        assert!(report.rejected[1].reason.contains("Duplicate"));

        let tx = service.get_transaction("TX005").await.unwrap();
        assert_eq!(tx.institution_id, "INST009");
        assert_eq!(tx.tx_type, 2);
    }

    #[tokio::test]
    async fn test_institution_admin() {
        let service = service().await;
        assert!(service
            .disable_institution("INST001")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service.list_institutions().await.unwrap().is_empty());
    }
}
