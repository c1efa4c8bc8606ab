use super::{Store, TransitionCommit};
use crate::errors::{BackofficeError, Result};
use crate::models::{AlertFilter, ClientFilter, IdempotencyRecord, Page, Stats, TransactionFilter};
use crate::outbox::{OutboxRecord, OutboxStatus};
use async_trait::async_trait;
use backoffice_core::ledger::accounts;
use backoffice_core::{
    AlertStatus, AmlAlert, Client, ClientStatus, LedgerEntry, Transaction, Wallet,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    ledger: Vec<LedgerEntry>,
    alerts: HashMap<Uuid, AmlAlert>,
    idempotency: HashMap<String, IdempotencyRecord>,
    outbox: HashMap<Uuid, OutboxRecord>,
}

/// Process-local store; one lock over all tables keeps commits atomic
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items
}

fn count_by<'a>(labels: impl Iterator<Item = &'a str>) -> std::collections::BTreeMap<String, i64> {
    let mut counts = std::collections::BTreeMap::new();
    for label in labels {
        *counts.entry(label.to_string()).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_client(&self, client: &Client) -> Result<()> {
        let mut state = self.state.write().await;
        if state.clients.values().any(|c| c.email.eq_ignore_ascii_case(&client.email)) {
            return Err(BackofficeError::InvalidState(format!(
                "a client with email {} already exists",
                client.email
            )));
        }
        state.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn update_client(&self, client: &Client) -> Result<()> {
        let mut state = self.state.write().await;
        match state.clients.get_mut(&client.id) {
            Some(existing) => {
                *existing = client.clone();
                Ok(())
            }
            None => Err(BackofficeError::ClientNotFound(client.id)),
        }
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>> {
        Ok(self.state.read().await.clients.get(&id).cloned())
    }

    async fn list_clients(&self, filter: &ClientFilter) -> Result<Vec<Client>> {
        let state = self.state.read().await;
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let matching: Vec<Client> = state
            .clients
            .values()
            .filter(|c| filter.status.map_or(true, |s| c.status == s))
            .filter(|c| filter.kind.map_or(true, |k| c.kind == k))
            .filter(|c| {
                search.as_ref().map_or(true, |needle| {
                    c.display_name.to_lowercase().contains(needle)
                        || c.email.to_lowercase().contains(needle)
                })
            })
            .cloned()
            .collect();
        Ok(filter.page.apply(newest_first(matching, |c| c.created_at)))
    }

    async fn commit_submission(&self, client: &Client, alert: Option<&AmlAlert>) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .clients
            .get(&client.id)
            .ok_or(BackofficeError::ClientNotFound(client.id))?;
        if stored.status != ClientStatus::Draft {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is already {}",
                client.id, stored.status
            )));
        }

        state.clients.insert(client.id, client.clone());
        if let Some(alert) = alert {
            state.alerts.insert(alert.id, alert.clone());
        }
        Ok(())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.state.write().await.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn update_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut state = self.state.write().await;
        match state.wallets.get_mut(&wallet.id) {
            Some(existing) => {
                *existing = wallet.clone();
                Ok(())
            }
            None => Err(BackofficeError::WalletNotFound(wallet.id)),
        }
    }

    async fn get_wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.state.read().await.wallets.get(&id).cloned())
    }

    async fn list_wallets(&self, client_id: Uuid) -> Result<Vec<Wallet>> {
        let state = self.state.read().await;
        let wallets = state
            .wallets
            .values()
            .filter(|w| w.client_id == client_id)
            .cloned()
            .collect();
        Ok(newest_first(wallets, |w| w.created_at))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.state
            .write()
            .await
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let matching = state
            .transactions
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.client_id.map_or(true, |c| t.client_id == c))
            .cloned()
            .collect();
        Ok(filter.page.apply(newest_first(matching, |t| t.created_at)))
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> Result<()> {
        let mut state = self.state.write().await;

        // Check everything before writing anything
        let stored = state
            .transactions
            .get(&commit.transaction.id)
            .ok_or(BackofficeError::TransactionNotFound(commit.transaction.id))?;
        if stored.version != commit.expected_version {
            return Err(BackofficeError::VersionConflict {
                expected: commit.expected_version,
                actual: stored.version,
            });
        }
        if let Some(record) = &commit.idempotency {
            if state.idempotency.contains_key(&record.key) {
                return Err(BackofficeError::IdempotencyConflict(format!(
                    "key {} was committed concurrently",
                    record.key
                )));
            }
        }

        state
            .transactions
            .insert(commit.transaction.id, commit.transaction.clone());
        state.ledger.extend(commit.entries.iter().cloned());
        if let Some(alert) = &commit.alert {
            state.alerts.insert(alert.id, alert.clone());
        }
        if let Some(record) = &commit.idempotency {
            state.idempotency.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }

    async fn ledger_entries(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn client_ledger_entries(&self, client_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let prefix = accounts::client_prefix(client_id);
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.account.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn update_alert(&self, alert: &AmlAlert, expected: AlertStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state
            .alerts
            .get_mut(&alert.id)
            .ok_or(BackofficeError::AlertNotFound(alert.id))?;
        if existing.status != expected {
            return Err(BackofficeError::InvalidState(format!(
                "alert {} is already {}",
                alert.id, existing.status
            )));
        }
        *existing = alert.clone();
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<AmlAlert>> {
        Ok(self.state.read().await.alerts.get(&id).cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<AmlAlert>> {
        let state = self.state.read().await;
        let matching = state
            .alerts
            .values()
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.kind.map_or(true, |k| a.kind == k))
            .filter(|a| filter.client_id.map_or(true, |c| a.client_id == c))
            .filter(|a| {
                filter
                    .transaction_id
                    .map_or(true, |t| a.transaction_id == Some(t))
            })
            .cloned()
            .collect();
        Ok(filter.page.apply(newest_first(matching, |a| a.created_at)))
    }

    async fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.state.read().await.idempotency.get(key).cloned())
    }

    async fn insert_outbox(&self, record: &OutboxRecord) -> Result<()> {
        self.state.write().await.outbox.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_outbox(&self, record: &OutboxRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.outbox.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(BackofficeError::Internal(format!(
                "outbox record {} not found",
                record.id
            ))),
        }
    }

    async fn list_outbox(&self, status: Option<OutboxStatus>, page: Page) -> Result<Vec<OutboxRecord>> {
        let state = self.state.read().await;
        let matching = state
            .outbox
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        Ok(page.apply(newest_first(matching, |r| r.created_at)))
    }

    async fn flag_stale_outbox(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut flagged = 0;
        for record in state.outbox.values_mut() {
            if record.status == OutboxStatus::Pending {
                record.status = OutboxStatus::RequiresReconciliation;
                record.error = Some("interrupted before completion".to_string());
                record.updated_at = now;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn stats(&self) -> Result<Stats> {
        let state = self.state.read().await;
        Ok(Stats {
            clients_by_status: count_by(state.clients.values().map(|c| c.status.as_str())),
            transactions_by_status: count_by(
                state.transactions.values().map(|t| t.status.as_str()),
            ),
            open_alerts: state
                .alerts
                .values()
                .filter(|a| a.status == AlertStatus::Open)
                .count() as i64,
            outbox_by_status: count_by(state.outbox.values().map(|r| r.status.as_str())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::{Asset, PayoutDestination, TransactionStatus};
    use rust_decimal_macros::dec;

    fn transaction() -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::now_v7(),
            client_id: Uuid::now_v7(),
            wallet_id: Uuid::now_v7(),
            source_asset: Asset::USDT,
            source_amount: dec!(100),
            target_currency: Asset::EUR,
            target_amount: None,
            fx_rate: None,
            fee_amount: None,
            payout_destination: PayoutDestination {
                holder_name: "Ada Lovelace".to_string(),
                iban: "DE89370400440532013000".to_string(),
                bic: None,
            },
            deposit_tx_hash: None,
            swap_reference: None,
            payout_reference: None,
            status: TransactionStatus::Pending,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_commit_is_version_guarded() {
        let store = MemoryStore::new();
        let tx = transaction();
        store.insert_transaction(&tx).await.unwrap();

        let mut next = tx.clone();
        next.status = TransactionStatus::DepositReceived;
        next.version = 1;
        let commit = TransitionCommit {
            transaction: next,
            expected_version: 0,
            entries: vec![],
            alert: None,
            idempotency: None,
        };
        store.commit_transition(&commit).await.unwrap();

        // Same commit again: stored version is now 1
        let err = store.commit_transition(&commit).await.unwrap_err();
        assert!(matches!(
            err,
            BackofficeError::VersionConflict {
                expected: 0,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_alert_update_requires_expected_status() {
        let store = MemoryStore::new();
        let tx = transaction();
        store.insert_transaction(&tx).await.unwrap();

        let alert = AmlAlert::open(
            backoffice_core::AlertKind::Kyt,
            backoffice_core::AlertSeverity::Medium,
            tx.client_id,
            Some(tx.id),
            60,
            vec!["large round amount".to_string()],
        );
        let mut next = tx.clone();
        next.version = 1;
        store
            .commit_transition(&TransitionCommit {
                transaction: next,
                expected_version: 0,
                entries: vec![],
                alert: Some(alert.clone()),
                idempotency: None,
            })
            .await
            .unwrap();

        let mut confirmed = alert.clone();
        confirmed.status = AlertStatus::Confirmed;
        store.update_alert(&confirmed, AlertStatus::Open).await.unwrap();

        // A second resolver that also read OPEN loses
        let mut dismissed = alert.clone();
        dismissed.status = AlertStatus::Dismissed;
        let err = store
            .update_alert(&dismissed, AlertStatus::Open)
            .await
            .unwrap_err();
        assert!(matches!(err, BackofficeError::InvalidState(_)));
        assert_eq!(
            store.get_alert(alert.id).await.unwrap().unwrap().status,
            AlertStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_submission_is_written_once() {
        let store = MemoryStore::new();
        let mut client = Client::new(
            backoffice_core::ClientKind::Individual,
            "grace@example.com".to_string(),
            "Grace Hopper".to_string(),
            "US".to_string(),
        );
        store.insert_client(&client).await.unwrap();

        client.status = ClientStatus::Submitted;
        let alert = AmlAlert::open(
            backoffice_core::AlertKind::Kyc,
            backoffice_core::AlertSeverity::High,
            client.id,
            None,
            95,
            vec!["sanctions match".to_string()],
        );
        store.commit_submission(&client, Some(&alert)).await.unwrap();
        assert!(store.get_alert(alert.id).await.unwrap().is_some());

        let again = AmlAlert::open(
            backoffice_core::AlertKind::Kyc,
            backoffice_core::AlertSeverity::High,
            client.id,
            None,
            95,
            vec!["sanctions match".to_string()],
        );
        assert!(store.commit_submission(&client, Some(&again)).await.is_err());
        assert!(store.get_alert(again.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        let a = Client::new(
            backoffice_core::ClientKind::Individual,
            "ada@example.com".to_string(),
            "Ada".to_string(),
            "GB".to_string(),
        );
        let b = Client::new(
            backoffice_core::ClientKind::Individual,
            "ADA@example.com".to_string(),
            "Ada L".to_string(),
            "GB".to_string(),
        );
        store.insert_client(&a).await.unwrap();
        assert!(store.insert_client(&b).await.is_err());
    }
}
