//! Persistence
//!
//! [`Store`] is implemented by [`postgres::PgStore`] for deployments and
//! [`memory::MemoryStore`] for tests and local runs. Both apply
//! [`TransitionCommit`] atomically: the transaction update is guarded by the
//! expected version and nothing is written when it does not match.
//! [`Store::commit_submission`] and [`Store::update_alert`] are guarded the
//! same way, on client and alert status.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{AlertFilter, ClientFilter, IdempotencyRecord, Page, Stats, TransactionFilter};
use crate::outbox::{OutboxRecord, OutboxStatus};
use async_trait::async_trait;
use backoffice_core::{AlertStatus, AmlAlert, Client, LedgerEntry, Transaction, Wallet};
use uuid::Uuid;

/// Everything one transaction action writes
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    /// New state; its `version` must be `expected_version + 1`
    pub transaction: Transaction,
    pub expected_version: i64,
    pub entries: Vec<LedgerEntry>,
    pub alert: Option<AmlAlert>,
    pub idempotency: Option<IdempotencyRecord>,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    // Clients
    async fn insert_client(&self, client: &Client) -> Result<()>;
    async fn update_client(&self, client: &Client) -> Result<()>;
    async fn get_client(&self, id: Uuid) -> Result<Option<Client>>;
    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>>;
    /// Submitted client plus its KYC alert, in one write. `InvalidState`
    /// unless the stored client is still DRAFT.
    async fn commit_submission(&self, client: &Client, alert: Option<&AmlAlert>) -> Result<()>;

    // Wallets
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()>;
    async fn update_wallet(&self, wallet: &Wallet) -> Result<()>;
    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>>;
    async fn list_wallets(&self, client_id: Uuid) -> Result<Vec<Wallet>>;

    // Transactions
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>>;
    /// Atomic, version-guarded; `VersionConflict` when the stored version moved
    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<()>;

    // Ledger
    async fn ledger_entries(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>>;
    async fn client_ledger_entries(&self, client_id: Uuid) -> Result<Vec<LedgerEntry>>;

    // Alerts
    /// Written only while the stored status is `expected`; `InvalidState` otherwise
    async fn update_alert(&self, alert: &AmlAlert, expected: AlertStatus) -> Result<()>;
    async fn get_alert(&self, id: Uuid) -> Result<Option<AmlAlert>>;
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AmlAlert>>;

    // Idempotency
    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    // Outbox
    async fn insert_outbox(&self, record: &OutboxRecord) -> Result<()>;
    async fn update_outbox(&self, record: &OutboxRecord) -> Result<()>;
    async fn list_outbox(&self, status: Option<OutboxStatus>, page: Page) -> Result<Vec<OutboxRecord>>;
    /// PENDING -> REQUIRES_RECONCILIATION; returns the number of records moved
    async fn flag_stale_outbox(&self) -> Result<u64>;

    async fn stats(&self) -> Result<Stats>;
}
