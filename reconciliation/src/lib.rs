//! Reconciliation loop
//!
//! Watches the ledger for counterparty verdicts and applies them to anchored
//! transactions.
//!
//! # Architecture
//!
//! 1. **Ingest**: fetch ledger events from the highest persisted height and
//!    record them in the event log, ignoring ones already seen
//! 2. **Evaluate**: hand each unprocessed `ReconciliationEvent` and its local
//!    transaction to a [`MatchPolicy`]
//! 3. **Apply**: move the transaction from Uploaded to Matched or Mismatch,
//!    upsert its reconciliation row and mark the event processed, all in one
//!    database transaction
//!
//! # Example
//!
//! ```no_run
//! use anchor_core::{gateway::InMemoryLedger, Store};
//! use reconciliation::{Config, LedgerVerdictPolicy, ReconciliationLoop};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> reconciliation::Result<()> {
//!     let store = Store::in_memory().await?;
//!     let gateway = Arc::new(InMemoryLedger::new("reconciliation"));
//!     let recon = Arc::new(ReconciliationLoop::new(
//!         store,
//!         gateway,
//!         Arc::new(LedgerVerdictPolicy),
//!         Config::default(),
//!     ));
//!
//!     let shutdown = CancellationToken::new();
//!     let handle = recon.spawn(shutdown.clone());
//!     shutdown.cancel();
//!     let _ = handle.await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod listener;
pub mod policy;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use listener::{PollReport, ReconciliationLoop};
pub use policy::{LedgerVerdictPolicy, MatchPolicy, Verdict};
