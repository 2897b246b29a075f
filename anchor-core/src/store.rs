//! Transaction store on SQLite
//!
//! # Tables
//!
//! - `institutions` - participants (unique id, unique ledger address)
//! - `transactions` - anchored transactions (unique biz_id, unique on-chain key)
//! - `chain_receipts` - 1:1 with transactions, written on upload
//! - `reconciliations` - 1:1 with transactions, written by the loop
//! - `event_logs` - ledger events, unique on (tx_hash, event_type, biz_id)
//!
//! Every lifecycle transition is a status-conditioned `UPDATE` inside a DB
//! transaction together with the rows it links.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::gateway::contract::biz_id_key;
use crate::gateway::{LedgerEvent, LedgerReceipt};
use crate::types::{
    ChainReceipt, EventLog, Institution, InstitutionStatus, Page, ReceiptStatus,
    Reconciliation, ReconciliationStatus, RegisterInstitutionRequest, Salt, Statistics,
    Transaction, TransactionFilter, TxStatus,
};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction as DbTransaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS institutions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        institution_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        ledger_address TEXT NOT NULL UNIQUE,
        status INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        biz_id TEXT NOT NULL UNIQUE,
        biz_key TEXT NOT NULL UNIQUE,
        institution_id TEXT NOT NULL,
        amount_cipher TEXT NOT NULL,
        amount_hash TEXT NOT NULL,
        data_hash TEXT NOT NULL,
        salt TEXT NOT NULL,
        sender TEXT NOT NULL,
        receiver TEXT NOT NULL,
        tx_type INTEGER NOT NULL DEFAULT 1,
        status INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_institution ON transactions (institution_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions (status)",
    r#"
    CREATE TABLE IF NOT EXISTS chain_receipts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        biz_id TEXT NOT NULL UNIQUE,
        tx_hash TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        ledger_endpoint TEXT NOT NULL,
        resource_cost INTEGER NOT NULL,
        status INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reconciliations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        biz_id TEXT NOT NULL UNIQUE,
        party_a TEXT NOT NULL,
        party_b TEXT NOT NULL,
        status INTEGER NOT NULL,
        matched_at TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        biz_id TEXT NOT NULL DEFAULT '',
        tx_hash TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        ledger_endpoint TEXT NOT NULL,
        data TEXT NOT NULL,
        processed BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE (tx_hash, event_type, biz_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_event_logs_pending ON event_logs (processed, block_height)",
];

/// Fields of a transaction about to be inserted
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Business identifier
    pub biz_id: String,
    /// Owning institution
    pub institution_id: String,
    /// Encrypted amount
    pub amount_cipher: String,
    /// Amount digest
    pub amount_hash: String,
    /// Commitment
    pub data_hash: String,
    pub(crate) salt: Salt,
    /// Paying party
    pub sender: String,
    /// Receiving party
    pub receiver: String,
    /// Transaction type code
    pub tx_type: i32,
}

/// Verdict to apply to an uploaded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    /// Business identifier
    pub biz_id: String,
    /// Uploading institution
    pub party_a: String,
    /// Counterparty
    pub party_b: String,
    /// Outcome
    pub status: ReconciliationStatus,
    /// Height of the deciding event
    pub block_height: u64,
}

/// SQL-backed transaction store
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open the database named by `config.url`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        info!(url = %config.url, "Transaction store opened");
        Ok(Self { pool })
    }

    /// Private in-memory database, schema applied
    pub async fn in_memory() -> Result<Self> {
        // one long-lived connection, so every query sees the same database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if missing
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Store schema ready");
        Ok(())
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections (graceful shutdown)
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Transaction store closed");
    }

    // Transactions

    /// Insert a new Pending transaction
    pub async fn insert_transaction(&self, new: &NewTransaction) -> Result<Transaction> {
        if self.find_transaction(&new.biz_id).await?.is_some() {
            return Err(Error::Duplicate(new.biz_id.clone()));
        }

        let now = Utc::now();
        sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions (
                biz_id, biz_key, institution_id, amount_cipher, amount_hash, data_hash, salt,
                sender, receiver, tx_type, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&new.biz_id)
        .bind(biz_id_key(&new.biz_id))
        .bind(&new.institution_id)
        .bind(&new.amount_cipher)
        .bind(&new.amount_hash)
        .bind(&new.data_hash)
        .bind(&new.salt)
        .bind(&new.sender)
        .bind(&new.receiver)
        .bind(new.tx_type)
        .bind(TxStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &new.biz_id))
    }

    /// Transaction by BizID, `NotFound` if absent
    pub async fn get_transaction(&self, biz_id: &str) -> Result<Transaction> {
        self.find_transaction(biz_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", biz_id)))
    }

    /// Transaction by BizID
    pub async fn find_transaction(&self, biz_id: &str) -> Result<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE biz_id = ?")
            .bind(biz_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tx)
    }

    /// Transaction named by a ledger event, either by BizID or by its
    /// hashed on-chain key
    pub async fn find_transaction_by_ledger_id(&self, ledger_id: &str) -> Result<Option<Transaction>> {
        let tx = sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE biz_id = ?1 OR biz_key = ?1 LIMIT 1",
        )
        .bind(ledger_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tx)
    }

    /// Filtered page of transactions, newest first
    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Page<Transaction>> {
        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 500);
        let offset = i64::from(page - 1) * i64::from(page_size);
        let status = filter.status.map(|s| s.as_i32());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE (?1 IS NULL OR institution_id = ?1) AND (?2 IS NULL OR status = ?2)
            "#,
        )
        .bind(&filter.institution_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE (?1 IS NULL OR institution_id = ?1) AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(&filter.institution_id)
        .bind(status)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Per-status counts, optionally for one institution
    pub async fn statistics(&self, institution_id: Option<&str>) -> Result<Statistics> {
        let rows: Vec<(TxStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM transactions
            WHERE (?1 IS NULL OR institution_id = ?1)
            GROUP BY status
            "#,
        )
        .bind(institution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = Statistics::default();
        for (status, count) in rows {
            match status {
                TxStatus::Pending => stats.pending = count,
                TxStatus::Uploaded => stats.uploaded = count,
                TxStatus::Matched => stats.matched = count,
                TxStatus::Mismatch => stats.mismatch = count,
            }
            stats.total += count;
        }
        if stats.total > 0 {
            stats.match_rate = stats.matched as f64 / stats.total as f64 * 100.0;
        }
        Ok(stats)
    }

    // Lifecycle

    /// Pending → Uploaded, persisting the ledger receipt in the same DB transaction
    pub async fn mark_uploaded(
        &self,
        biz_id: &str,
        receipt: &LedgerReceipt,
        ledger_endpoint: &str,
    ) -> Result<ChainReceipt> {
        let now = Utc::now();
        let mut db_tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transactions SET status = ?, updated_at = ? WHERE biz_id = ? AND status = ?",
        )
        .bind(TxStatus::Uploaded)
        .bind(now)
        .bind(biz_id)
        .bind(TxStatus::Pending)
        .execute(&mut *db_tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Self::transition_error(&mut db_tx, biz_id, TxStatus::Pending).await);
        }

        let chain_receipt = sqlx::query_as::<_, ChainReceipt>(
            r#"
            INSERT INTO chain_receipts (
                biz_id, tx_hash, block_height, block_hash, ledger_endpoint,
                resource_cost, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(biz_id)
        .bind(&receipt.tx_hash)
        .bind(to_i64(receipt.block_height, "block_height")?)
        .bind(&receipt.block_hash)
        .bind(ledger_endpoint)
        .bind(to_i64(receipt.resource_cost, "resource_cost")?)
        .bind(ReceiptStatus::Success)
        .bind(now)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;

        debug!(biz_id = %biz_id, tx_hash = %receipt.tx_hash, "Transaction marked uploaded");
        Ok(chain_receipt)
    }

    /// Chain receipt by BizID
    pub async fn get_receipt(&self, biz_id: &str) -> Result<ChainReceipt> {
        sqlx::query_as::<_, ChainReceipt>("SELECT * FROM chain_receipts WHERE biz_id = ?")
            .bind(biz_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chain receipt {}", biz_id)))
    }

    /// Uploaded → Matched/Mismatch
    ///
    /// Upserts the reconciliation row and marks `event_id` processed in the
    /// same DB transaction. Nothing is written if the transaction is not
    /// Uploaded.
    pub async fn apply_reconciliation(
        &self,
        outcome: &ReconciliationOutcome,
        event_id: i64,
    ) -> Result<Reconciliation> {
        let now = Utc::now();
        let block_height = to_i64(outcome.block_height, "block_height")?;
        let mut db_tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transactions SET status = ?, updated_at = ? WHERE biz_id = ? AND status = ?",
        )
        .bind(TxStatus::from(outcome.status))
        .bind(now)
        .bind(&outcome.biz_id)
        .bind(TxStatus::Uploaded)
        .execute(&mut *db_tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(
                Self::transition_error(&mut db_tx, &outcome.biz_id, TxStatus::Uploaded).await,
            );
        }

        let reconciliation = sqlx::query_as::<_, Reconciliation>(
            r#"
            INSERT INTO reconciliations (
                biz_id, party_a, party_b, status, matched_at, block_height, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5, ?5)
            ON CONFLICT (biz_id) DO UPDATE SET
                party_a = excluded.party_a,
                party_b = excluded.party_b,
                status = excluded.status,
                matched_at = excluded.matched_at,
                block_height = excluded.block_height,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&outcome.biz_id)
        .bind(&outcome.party_a)
        .bind(&outcome.party_b)
        .bind(outcome.status)
        .bind(now)
        .bind(block_height)
        .fetch_one(&mut *db_tx)
        .await?;

        sqlx::query("UPDATE event_logs SET processed = 1 WHERE id = ?")
            .bind(event_id)
            .execute(&mut *db_tx)
            .await?;

        db_tx.commit().await?;

        debug!(
            biz_id = %outcome.biz_id,
            status = outcome.status.as_str(),
            block_height = outcome.block_height,
            "Reconciliation applied"
        );
        Ok(reconciliation)
    }

    /// Reconciliation by BizID
    pub async fn get_reconciliation(&self, biz_id: &str) -> Result<Reconciliation> {
        sqlx::query_as::<_, Reconciliation>("SELECT * FROM reconciliations WHERE biz_id = ?")
            .bind(biz_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reconciliation {}", biz_id)))
    }

    async fn transition_error(
        db_tx: &mut DbTransaction<'_, Sqlite>,
        biz_id: &str,
        expected: TxStatus,
    ) -> Error {
        let current: std::result::Result<Option<TxStatus>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM transactions WHERE biz_id = ?")
                .bind(biz_id)
                .fetch_optional(&mut **db_tx)
                .await;

        match current {
            Ok(Some(status)) => Error::InvalidState(format!(
                "{} is {}, expected {}",
                biz_id, status, expected
            )),
            Ok(None) => Error::NotFound(format!("transaction {}", biz_id)),
            Err(e) => e.into(),
        }
    }

    // Institutions

    /// Insert an Enabled institution
    pub async fn insert_institution(&self, request: &RegisterInstitutionRequest) -> Result<Institution> {
        let now = Utc::now();
        sqlx::query_as::<_, Institution>(
            r#"
            INSERT INTO institutions (institution_id, name, ledger_address, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&request.institution_id)
        .bind(&request.name)
        .bind(&request.ledger_address)
        .bind(InstitutionStatus::Enabled)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_violation(e, &request.institution_id))
    }

    /// Institution by id
    pub async fn get_institution(&self, institution_id: &str) -> Result<Institution> {
        sqlx::query_as::<_, Institution>("SELECT * FROM institutions WHERE institution_id = ?")
            .bind(institution_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("institution {}", institution_id)))
    }

    /// All institutions, oldest first
    pub async fn list_institutions(&self) -> Result<Vec<Institution>> {
        let rows = sqlx::query_as::<_, Institution>("SELECT * FROM institutions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Enable or disable an institution
    pub async fn set_institution_status(
        &self,
        institution_id: &str,
        status: InstitutionStatus,
    ) -> Result<Institution> {
        sqlx::query_as::<_, Institution>(
            "UPDATE institutions SET status = ?, updated_at = ? WHERE institution_id = ? RETURNING *",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(institution_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("institution {}", institution_id)))
    }

    // Event log

    /// Persist a ledger event; `false` if it was already recorded
    pub async fn record_event(&self, event: &LedgerEvent) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO event_logs (
                event_type, biz_id, tx_hash, block_height, ledger_endpoint, data, processed, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(event.event_type)
        .bind(&event.biz_id)
        .bind(&event.tx_hash)
        .bind(to_i64(event.block_height, "block_height")?)
        .bind(&event.ledger_endpoint)
        .bind(event.data.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    /// Oldest unprocessed events, in ledger order
    pub async fn unprocessed_events(&self, limit: u32) -> Result<Vec<EventLog>> {
        self.unprocessed_events_after(None, limit).await
    }

    /// Unprocessed events ordered after `after` in ledger order
    ///
    /// Keyset paging on `(block_height, id)`, so rows left unprocessed on one
    /// page never hide the rows behind them.
    pub async fn unprocessed_events_after(
        &self,
        after: Option<&EventLog>,
        limit: u32,
    ) -> Result<Vec<EventLog>> {
        let (height, id) = after.map_or((-1, 0), |e| (e.block_height, e.id));
        let rows = sqlx::query_as::<_, EventLog>(
            r#"
            SELECT * FROM event_logs
            WHERE processed = 0 AND (block_height > ?1 OR (block_height = ?1 AND id > ?2))
            ORDER BY block_height, id
            LIMIT ?3
            "#,
        )
        .bind(height)
        .bind(id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark an event handled without applying a verdict
    pub async fn mark_event_processed(&self, event_id: i64) -> Result<()> {
        sqlx::query("UPDATE event_logs SET processed = 1 WHERE id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Highest block height seen in the event log
    pub async fn max_event_height(&self) -> Result<Option<u64>> {
        let height: Option<i64> = sqlx::query_scalar("SELECT MAX(block_height) FROM event_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(height.map(|h| h.max(0) as u64))
    }

    /// Event log row by id
    pub async fn get_event(&self, event_id: i64) -> Result<EventLog> {
        sqlx::query_as::<_, EventLog>("SELECT * FROM event_logs WHERE id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))
    }
}

fn unique_violation(err: sqlx::Error, key: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::Duplicate(key.to_string());
        }
    }
    err.into()
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Validation(format!("{} out of range: {}", field, value)))
}
