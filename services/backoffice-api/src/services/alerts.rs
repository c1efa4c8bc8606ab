use super::{validate, ClientService, TransactionService};
use crate::errors::{BackofficeError, Result};
use crate::models::{ActionRequest, AlertFilter, Resolution, ResolveAlertRequest};
use crate::store::Store;
use backoffice_core::{AlertKind, AlertStatus, AmlAlert, TransactionAction};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct AlertService {
    store: Arc<dyn Store>,
    transactions: Arc<TransactionService>,
    clients: Arc<ClientService>,
}

impl AlertService {
    pub fn new(
        store: Arc<dyn Store>,
        transactions: Arc<TransactionService>,
        clients: Arc<ClientService>,
    ) -> Self {
        Self {
            store,
            transactions,
            clients,
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<AmlAlert> {
        self.store
            .get_alert(id)
            .await?
            .ok_or(BackofficeError::AlertNotFound(id))
    }

    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<AmlAlert>> {
        self.store.list_alerts(filter).await
    }

    /// Close an open alert. Confirming it fails the transaction or rejects
    /// the client it was raised against; if that fails the alert is reopened.
    pub async fn resolve(
        &self,
        id: Uuid,
        request: ResolveAlertRequest,
        actor: &str,
    ) -> Result<AmlAlert> {
        validate(&request)?;

        let open = self.get(id).await?;
        if !open.is_open() {
            return Err(BackofficeError::InvalidState(format!(
                "alert {} is already {}",
                id, open.status
            )));
        }

        let mut alert = open.clone();
        alert.status = request.resolution.into();
        alert.resolution_note = Some(request.note.clone());
        alert.resolved_by = Some(
            request
                .resolved_by
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| actor.to_string()),
        );
        alert.resolved_at = Some(Utc::now());

        // Concurrent resolvers race here; only one moves it out of OPEN
        self.store.update_alert(&alert, AlertStatus::Open).await?;

        if request.resolution == Resolution::Confirmed {
            if let Err(e) = self.apply_confirmation(&alert, &request.note, actor).await {
                if let Err(reopen_err) = self.store.update_alert(&open, alert.status).await {
                    error!("Alert {} could not be reopened: {}", id, reopen_err);
                }
                return Err(e);
            }
        }

        info!(
            "Alert {} ({}) resolved as {} by {}",
            id,
            alert.kind,
            alert.status,
            alert.resolved_by.as_deref().unwrap_or(actor)
        );
        Ok(alert)
    }

    async fn apply_confirmation(&self, alert: &AmlAlert, note: &str, actor: &str) -> Result<()> {
        let reason = format!("AML alert {} confirmed: {}", alert.id, note);
        match (alert.kind, alert.transaction_id) {
            (AlertKind::Kyt, Some(transaction_id)) => {
                self.fail_transaction(alert.id, transaction_id, reason, actor)
                    .await
            }
            (AlertKind::Kyc, _) => self.clients.reject_after_alert(alert.client_id, reason).await,
            _ => Ok(()),
        }
    }

    async fn fail_transaction(
        &self,
        alert_id: Uuid,
        transaction_id: Uuid,
        reason: String,
        actor: &str,
    ) -> Result<()> {
        let transaction = self.transactions.get(transaction_id).await?.transaction;
        if transaction.status.is_terminal() {
            return Ok(());
        }

        let request = ActionRequest {
            action: TransactionAction::MarkFailed,
            idempotency_key: format!("alert-{}-confirm", alert_id),
            expected_version: None,
            reason: Some(reason),
            force: false,
            deposit_tx_hash: None,
            source_address: None,
        };
        if let Err(e) = self
            .transactions
            .perform_action(transaction_id, request, actor)
            .await
        {
            warn!(
                "Confirmed alert {} could not fail transaction {}: {}",
                alert_id, transaction_id, e
            );
            return Err(e);
        }
        Ok(())
    }
}
