//! Admin-driven transaction pipeline
//!
//! Every action runs under a per-transaction lock and commits one
//! [`TransitionCommit`]: new state, ledger posting, optional alert and the
//! idempotency record, all guarded by the transaction version. Provider calls
//! happen before the commit; if the commit then fails, the provider effect is
//! compensated or flagged for reconciliation.

use super::{balance_lines, record_alert_opened, validate};
use crate::errors::{BackofficeError, Result};
use crate::metrics::TRANSACTION_ACTIONS;
use crate::models::{
    ActionRequest, ActionResponse, AlertFilter, CreateTransactionRequest, IdempotencyRecord,
    LedgerResponse, Page, TransactionFilter, TransactionView,
};
use crate::outbox::{Outbox, OutboxOperation, OutboxRecord};
use crate::providers::{PayoutRequest, PayoutStatus, ProviderSet, SwapRequest};
use crate::retry::RetryStrategy;
use crate::store::{Store, TransitionCommit};
use backoffice_core::ledger;
use backoffice_core::state;
use backoffice_core::{
    AlertKind, AlertSeverity, AlertStatus, AmlAlert, Asset, ClientStatus, LedgerEntry, RiskLevel,
    Transaction, TransactionAction, TransactionStatus, WalletStatus,
};
use chrono::Utc;
use compliance_service::{ComplianceScreener, RiskDecision, TransactionScreeningRequest};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of the action-specific work, before commit
struct ActionOutcome {
    transaction: Transaction,
    entries: Vec<LedgerEntry>,
    alert: Option<AmlAlert>,
    /// Provider call whose effect must be undone if the commit fails
    provider_call: Option<OutboxRecord>,
}

pub struct TransactionService {
    store: Arc<dyn Store>,
    providers: ProviderSet,
    screener: Arc<ComplianceScreener>,
    outbox: Outbox,
    retry: RetryStrategy,
    platform_fee_bps: u32,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn Store>,
        providers: ProviderSet,
        screener: Arc<ComplianceScreener>,
        outbox: Outbox,
        retry: RetryStrategy,
        platform_fee_bps: u32,
    ) -> Self {
        Self {
            store,
            providers,
            screener,
            outbox,
            retry,
            platform_fee_bps,
            locks: DashMap::new(),
        }
    }

    pub async fn create(&self, request: CreateTransactionRequest) -> Result<TransactionView> {
        validate(&request)?;

        let client = self
            .store
            .get_client(request.client_id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(request.client_id))?;
        if client.status != ClientStatus::Approved {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}; transactions require an APPROVED client",
                client.id, client.status
            )));
        }

        let wallet = self
            .store
            .get_wallet(request.wallet_id)
            .await?
            .ok_or(BackofficeError::WalletNotFound(request.wallet_id))?;
        if wallet.client_id != client.id {
            return Err(BackofficeError::Validation(format!(
                "wallet {} does not belong to client {}",
                wallet.id, client.id
            )));
        }
        if wallet.status != WalletStatus::Active {
            return Err(BackofficeError::InvalidState(format!(
                "wallet {} is {}",
                wallet.id, wallet.status
            )));
        }
        if !request.target_currency.is_fiat() {
            return Err(BackofficeError::Validation(format!(
                "payout currency {} is not a fiat currency",
                request.target_currency
            )));
        }
        if wallet.asset.round(request.source_amount) != request.source_amount {
            return Err(BackofficeError::Validation(format!(
                "{} supports at most {} decimal places",
                wallet.asset,
                wallet.asset.scale()
            )));
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::now_v7(),
            client_id: client.id,
            wallet_id: wallet.id,
            source_asset: wallet.asset,
            source_amount: request.source_amount,
            target_currency: request.target_currency,
            target_amount: None,
            fx_rate: None,
            fee_amount: None,
            payout_destination: request.payout_destination.into(),
            deposit_tx_hash: None,
            swap_reference: None,
            payout_reference: None,
            status: TransactionStatus::Pending,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_transaction(&transaction).await?;

        info!(
            "Created transaction {} for client {}: {} {} -> {}",
            transaction.id,
            client.id,
            transaction.source_amount,
            transaction.source_asset,
            transaction.target_currency
        );
        Ok(transaction.into())
    }

    pub async fn get(&self, id: Uuid) -> Result<TransactionView> {
        Ok(self.load(id).await?.into())
    }

    pub async fn list(&self, filter: &TransactionFilter) -> Result<Vec<TransactionView>> {
        let transactions = self.store.list_transactions(filter).await?;
        Ok(transactions.into_iter().map(TransactionView::from).collect())
    }

    pub async fn ledger(&self, id: Uuid) -> Result<LedgerResponse> {
        self.load(id).await?;
        let entries = self.store.ledger_entries(id).await?;
        Ok(LedgerResponse {
            transaction_id: id,
            balances: balance_lines(&entries, None),
            entries,
        })
    }

    async fn load(&self, id: Uuid) -> Result<Transaction> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or(BackofficeError::TransactionNotFound(id))
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // Dropped once the map holds the only reference: no holder, no waiter
    fn release_lock(&self, id: Uuid) {
        self.locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Transactions with an action in flight
    pub fn locked_transactions(&self) -> usize {
        self.locks.len()
    }

    /// Apply an admin action to a transaction
    pub async fn perform_action(
        &self,
        id: Uuid,
        request: ActionRequest,
        actor: &str,
    ) -> Result<ActionResponse> {
        validate(&request)?;
        let action = request.action;

        let result = self.perform_action_inner(id, &request, actor).await;
        self.release_lock(id);
        let outcome = match &result {
            Ok(response) if response.replayed => "replayed",
            Ok(_) => "success",
            Err(e) if e.is_provider_error() => "provider_error",
            Err(_) => "rejected",
        };
        TRANSACTION_ACTIONS
            .with_label_values(&[action.as_str(), outcome])
            .inc();

        match &result {
            Ok(response) => info!(
                transaction_id = %id,
                action = %action,
                status = %response.transaction.transaction.status,
                replayed = response.replayed,
                "Transaction action applied"
            ),
            Err(e) => warn!(
                transaction_id = %id,
                action = %action,
                error = %e,
                "Transaction action refused"
            ),
        }
        result
    }

    async fn perform_action_inner(
        &self,
        id: Uuid,
        request: &ActionRequest,
        actor: &str,
    ) -> Result<ActionResponse> {
        let fingerprint = fingerprint(id, request)?;
        if let Some(response) = self.replay(&request.idempotency_key, id, &fingerprint).await? {
            return Ok(response);
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        // A request with the same key may have committed while we waited
        if let Some(response) = self.replay(&request.idempotency_key, id, &fingerprint).await? {
            return Ok(response);
        }

        let transaction = self.load(id).await?;
        if let Some(expected) = request.expected_version {
            if expected != transaction.version {
                return Err(BackofficeError::VersionConflict {
                    expected,
                    actual: transaction.version,
                });
            }
        }

        let next_status = state::transition(transaction.status, request.action)?;

        let mut outcome = match request.action {
            TransactionAction::MarkReceived => self.mark_received(&transaction, request).await?,
            TransactionAction::ExecuteSwap => self.execute_swap(&transaction, request).await?,
            TransactionAction::SendPayout => self.send_payout(&transaction, request).await?,
            TransactionAction::MarkComplete => {
                self.mark_complete(&transaction, request, actor).await?
            }
            TransactionAction::MarkFailed => self.mark_failed(&transaction, request, actor).await?,
        };

        // mark_received may end in FAILED instead
        if outcome.transaction.status != TransactionStatus::Failed {
            outcome.transaction.status = next_status;
        }
        outcome.transaction.version = transaction.version + 1;
        outcome.transaction.updated_at = Utc::now();

        let response = ActionResponse {
            transaction: outcome.transaction.clone().into(),
            entries: outcome.entries.clone(),
            alert: outcome.alert.clone(),
            replayed: false,
        };

        let commit = TransitionCommit {
            transaction: outcome.transaction,
            expected_version: transaction.version,
            entries: outcome.entries,
            alert: outcome.alert,
            idempotency: Some(IdempotencyRecord {
                key: request.idempotency_key.clone(),
                transaction_id: id,
                action: request.action,
                fingerprint,
                response: serde_json::to_value(&response)?,
                created_at: Utc::now(),
            }),
        };

        if let Err(e) = self.store.commit_transition(&commit).await {
            error!("Commit of {} on {} failed: {}", request.action, id, e);
            if let Some(mut record) = outcome.provider_call {
                self.compensate(&mut record).await;
            }
            return Err(e);
        }

        if let Some(alert) = &commit.alert {
            record_alert_opened(alert);
        }
        Ok(response)
    }

    /// Stored response for `key`, or a conflict if the key was used differently
    async fn replay(&self, key: &str, id: Uuid, fingerprint: &str) -> Result<Option<ActionResponse>> {
        let Some(record) = self.store.get_idempotency(key).await? else {
            return Ok(None);
        };

        if record.transaction_id != id || record.fingerprint != fingerprint {
            return Err(BackofficeError::IdempotencyConflict(format!(
                "key {} was already used for a different request",
                key
            )));
        }

        let mut response: ActionResponse = serde_json::from_value(record.response)?;
        response.replayed = true;
        Ok(Some(response))
    }

    /// Undo (or flag) a provider effect whose commit failed
    async fn compensate(&self, record: &mut OutboxRecord) {
        let result = match record.operation {
            OutboxOperation::CreatePayout => {
                let reference = record
                    .response
                    .as_ref()
                    .and_then(|r| r.get("reference"))
                    .and_then(|r| r.as_str())
                    .map(str::to_string);
                match reference {
                    Some(reference) => match self.providers.payout.cancel_payout(&reference).await {
                        Ok(()) => {
                            self.outbox
                                .mark_compensated(record, "payout cancelled after failed commit")
                                .await
                        }
                        Err(e) => {
                            self.outbox
                                .mark_requires_reconciliation(
                                    record,
                                    &format!("commit failed and cancel failed: {}", e),
                                )
                                .await
                        }
                    },
                    None => {
                        self.outbox
                            .mark_requires_reconciliation(record, "commit failed; no payout reference")
                            .await
                    }
                }
            }
            // A swap cannot be undone
            _ => {
                self.outbox
                    .mark_requires_reconciliation(
                        record,
                        "provider call succeeded but the local commit failed",
                    )
                    .await
            }
        };

        if let Err(e) = result {
            error!("Could not record compensation for outbox {}: {}", record.id, e);
        }
    }

    async fn open_alerts(&self, transaction_id: Uuid) -> Result<Vec<AmlAlert>> {
        self.store
            .list_alerts(&AlertFilter {
                status: Some(AlertStatus::Open),
                kind: None,
                client_id: None,
                transaction_id: Some(transaction_id),
                page: Page::default(),
            })
            .await
    }

    async fn require_active_client(&self, transaction: &Transaction) -> Result<()> {
        let client = self
            .store
            .get_client(transaction.client_id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(transaction.client_id))?;
        if client.status != ClientStatus::Approved {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}",
                client.id, client.status
            )));
        }
        Ok(())
    }

    // ===== Actions =====

    async fn mark_received(&self, tx: &Transaction, request: &ActionRequest) -> Result<ActionOutcome> {
        let client = self
            .store
            .get_client(tx.client_id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(tx.client_id))?;
        let wallet = self
            .store
            .get_wallet(tx.wallet_id)
            .await?
            .ok_or(BackofficeError::WalletNotFound(tx.wallet_id))?;
        if wallet.status != WalletStatus::Active {
            return Err(BackofficeError::InvalidState(format!(
                "wallet {} is {}",
                wallet.id, wallet.status
            )));
        }

        let screening = TransactionScreeningRequest {
            transaction_id: tx.id,
            asset: tx.source_asset.as_str().to_string(),
            network: wallet.network.clone(),
            amount: tx.source_amount,
            estimated_value_usd: self.estimate_usd(tx.source_asset, tx.source_amount).await,
            deposit_address: wallet.address.clone(),
            source_address: request.source_address.clone(),
            client_country: client.country.clone(),
            destination_country: tx
                .payout_destination
                .iban
                .get(0..2)
                .map(|c| c.to_uppercase()),
            client_high_risk: client.risk_level == Some(RiskLevel::High),
        };
        let result = self.screener.screen_transaction(&screening)?;

        let mut updated = tx.clone();
        updated.deposit_tx_hash = request.deposit_tx_hash.clone();

        let outcome = match result.decision() {
            RiskDecision::Reject => {
                updated.status = TransactionStatus::Failed;
                updated.failure_reason = Some(format!(
                    "Blocked by KYT screening: {}",
                    result.reasons.join("; ")
                ));
                ActionOutcome {
                    transaction: updated,
                    entries: vec![],
                    alert: Some(AmlAlert::open(
                        AlertKind::Kyt,
                        AlertSeverity::High,
                        tx.client_id,
                        Some(tx.id),
                        result.risk_score,
                        result.reasons,
                    )),
                    provider_call: None,
                }
            }
            RiskDecision::Review => ActionOutcome {
                entries: ledger::posting_for(&updated, TransactionAction::MarkReceived)?,
                transaction: updated,
                alert: Some(AmlAlert::open(
                    AlertKind::Kyt,
                    AlertSeverity::Medium,
                    tx.client_id,
                    Some(tx.id),
                    result.risk_score,
                    result.reasons,
                )),
                provider_call: None,
            },
            RiskDecision::Approve => ActionOutcome {
                entries: ledger::posting_for(&updated, TransactionAction::MarkReceived)?,
                transaction: updated,
                alert: None,
                provider_call: None,
            },
        };
        Ok(outcome)
    }

    // USD valuation for KYT; unknown when the swap desk has no quote
    async fn estimate_usd(&self, asset: Asset, amount: Decimal) -> Option<Decimal> {
        match self.providers.swap.quote(asset, Asset::USD).await {
            Ok(rate) => Some(Asset::USD.round(amount * rate)),
            Err(e) => {
                warn!("No USD quote for {}: {}", asset, e);
                None
            }
        }
    }

    async fn execute_swap(&self, tx: &Transaction, request: &ActionRequest) -> Result<ActionOutcome> {
        let open = self.open_alerts(tx.id).await?;
        if !open.is_empty() {
            return Err(BackofficeError::OpenAlerts(tx.id));
        }
        self.require_active_client(tx).await?;

        let swap_request = SwapRequest {
            client_reference: request.idempotency_key.clone(),
            transaction_id: tx.id,
            source_asset: tx.source_asset,
            source_amount: tx.source_amount,
            target_currency: tx.target_currency,
        };
        let (record, swap) = self
            .outbox
            .dispatch(
                OutboxOperation::ExecuteSwap,
                tx.id,
                &request.idempotency_key,
                &swap_request,
                || self.providers.swap.execute_swap(&swap_request),
            )
            .await?;

        let fiat = tx.target_currency;
        let target = fiat.round(swap.target_amount);
        let fee = fiat.round(target * Decimal::from(self.platform_fee_bps) / Decimal::from(10_000));

        let mut updated = tx.clone();
        updated.target_amount = Some(target);
        updated.fx_rate = Some(swap.rate);
        updated.fee_amount = Some(fee);
        updated.swap_reference = Some(swap.reference);

        Ok(ActionOutcome {
            entries: ledger::posting_for(&updated, TransactionAction::ExecuteSwap)?,
            transaction: updated,
            alert: None,
            provider_call: Some(record),
        })
    }

    async fn send_payout(&self, tx: &Transaction, request: &ActionRequest) -> Result<ActionOutcome> {
        let open = self.open_alerts(tx.id).await?;
        if !open.is_empty() {
            return Err(BackofficeError::OpenAlerts(tx.id));
        }
        self.require_active_client(tx).await?;

        let amount = tx
            .net_payout()
            .filter(|net| *net > Decimal::ZERO)
            .ok_or_else(|| BackofficeError::InvalidState(format!("transaction {} has nothing to pay out", tx.id)))?;

        let payout_request = PayoutRequest {
            client_reference: request.idempotency_key.clone(),
            transaction_id: tx.id,
            amount,
            currency: tx.target_currency,
            destination: tx.payout_destination.clone(),
        };
        let (record, payout) = self
            .outbox
            .dispatch(
                OutboxOperation::CreatePayout,
                tx.id,
                &request.idempotency_key,
                &payout_request,
                || self.providers.payout.create_payout(&payout_request),
            )
            .await?;

        // Same key as a payout cancelled after a failed commit
        if matches!(payout.status, PayoutStatus::Cancelled | PayoutStatus::Failed) {
            return Err(BackofficeError::ProviderRejected {
                provider: "payout".to_string(),
                message: format!("payout {} is {}", payout.reference, payout.status),
            });
        }

        let mut updated = tx.clone();
        updated.payout_reference = Some(payout.reference);

        Ok(ActionOutcome {
            entries: ledger::posting_for(&updated, TransactionAction::SendPayout)?,
            transaction: updated,
            alert: None,
            provider_call: Some(record),
        })
    }

    async fn mark_complete(
        &self,
        tx: &Transaction,
        request: &ActionRequest,
        actor: &str,
    ) -> Result<ActionOutcome> {
        let reference = tx.payout_reference.clone().ok_or_else(|| {
            BackofficeError::InvalidState(format!("transaction {} has no payout reference", tx.id))
        })?;

        if request.force {
            warn!(
                "Transaction {} marked complete by {} without checking payout {}",
                tx.id, actor, reference
            );
        } else {
            let status = self
                .retry
                .execute_with_retry(
                    || self.providers.payout.payout_status(&reference),
                    "payout_status",
                )
                .await?;
            if status != PayoutStatus::Completed {
                return Err(BackofficeError::PayoutNotSettled(format!(
                    "payout {} is {}",
                    reference, status
                )));
            }
        }

        Ok(ActionOutcome {
            entries: ledger::posting_for(tx, TransactionAction::MarkComplete)?,
            transaction: tx.clone(),
            alert: None,
            provider_call: None,
        })
    }

    async fn mark_failed(
        &self,
        tx: &Transaction,
        request: &ActionRequest,
        actor: &str,
    ) -> Result<ActionOutcome> {
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BackofficeError::Validation("mark_failed requires a reason".to_string()))?;

        let mut updated = tx.clone();
        updated.status = TransactionStatus::Failed;
        updated.failure_reason = Some(reason.to_string());

        let mut entries = Vec::new();
        let mut provider_call = None;

        if tx.status == TransactionStatus::PayoutInProgress {
            if let Some(reference) = tx.payout_reference.clone() {
                provider_call = self.cancel_payout(tx, &reference, reason, request).await?;
            }

            let payout_entries: Vec<LedgerEntry> = self
                .store
                .ledger_entries(tx.id)
                .await?
                .into_iter()
                .filter(|e| e.action == TransactionAction::SendPayout && e.reverses.is_none())
                .collect();
            entries = ledger::reverse(&payout_entries, TransactionAction::MarkFailed)?;
        }

        info!("Transaction {} failed by {}: {}", tx.id, actor, reason);
        Ok(ActionOutcome {
            transaction: updated,
            entries,
            alert: None,
            provider_call,
        })
    }

    /// Stop a payout before its ledger posting is reversed.
    ///
    /// Refused when the bank has settled the payout or the provider rejects
    /// the cancel. Transient failures leave the outcome unknown; the reversal
    /// still goes ahead.
    async fn cancel_payout(
        &self,
        tx: &Transaction,
        reference: &str,
        reason: &str,
        request: &ActionRequest,
    ) -> Result<Option<OutboxRecord>> {
        match self
            .retry
            .execute_with_retry(|| self.providers.payout.payout_status(reference), "payout_status")
            .await
        {
            Ok(PayoutStatus::Completed) => {
                return Err(BackofficeError::PayoutNotCancellable(format!(
                    "payout {} has already settled",
                    reference
                )))
            }
            Ok(PayoutStatus::Failed | PayoutStatus::Cancelled) => return Ok(None),
            Ok(_) => {}
            Err(e) => warn!("Status of payout {} unknown before cancel: {}", reference, e),
        }

        let cancel_request = json!({ "reference": reference, "reason": reason });
        match self
            .outbox
            .dispatch(
                OutboxOperation::CancelPayout,
                tx.id,
                &request.idempotency_key,
                &cancel_request,
                || self.providers.payout.cancel_payout(reference),
            )
            .await
        {
            Ok((record, ())) => Ok(Some(record)),
            Err(e) if e.is_transient() => {
                warn!("Could not cancel payout {} for {}: {}", reference, tx.id, e);
                Ok(None)
            }
            Err(e) => Err(BackofficeError::PayoutNotCancellable(format!(
                "payout {}: {}",
                reference, e
            ))),
        }
    }
}

/// SHA-256 over transaction id, action and the rest of the payload
fn fingerprint(id: Uuid, request: &ActionRequest) -> Result<String> {
    let payload = json!({
        "transaction_id": id,
        "action": request.action,
        "expected_version": request.expected_version,
        "reason": request.reason,
        "force": request.force,
        "deposit_tx_hash": request.deposit_tx_hash,
        "source_address": request.source_address,
    });
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&payload)?);
    Ok(format!("{:x}", hasher.finalize()))
}
