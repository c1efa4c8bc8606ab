use super::{balance_lines, record_alert_opened, validate};
use crate::auth::AuthenticatedUser;
use crate::errors::{BackofficeError, Result};
use crate::metrics::ONBOARDING_SUBMISSIONS;
use crate::models::{
    AlertFilter, ClientBalances, ClientFilter, ClientView, Decision, DecisionRequest, Page,
    StartOnboardingRequest, StatusChangeRequest,
};
use crate::store::Store;
use backoffice_core::ledger::accounts;
use backoffice_core::{
    AlertKind, AlertSeverity, AlertStatus, AmlAlert, Client, ClientStatus, RiskLevel, StepData,
};
use chrono::Utc;
use compliance_service::{ComplianceScreener, PartyScreeningRequest, ScreeningStatus};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ClientService {
    store: Arc<dyn Store>,
    screener: Arc<ComplianceScreener>,
}

impl ClientService {
    pub fn new(store: Arc<dyn Store>, screener: Arc<ComplianceScreener>) -> Self {
        Self { store, screener }
    }

    pub async fn get(&self, id: Uuid) -> Result<Client> {
        self.store
            .get_client(id)
            .await?
            .ok_or(BackofficeError::ClientNotFound(id))
    }

    /// Client as seen by `user`; applicants only see the records they started
    pub async fn get_for(&self, id: Uuid, user: &AuthenticatedUser) -> Result<Client> {
        let client = self.get(id).await?;
        if user.is_admin() || client.owner.as_deref() == Some(user.subject.as_str()) {
            Ok(client)
        } else {
            Err(BackofficeError::ClientNotFound(id))
        }
    }

    pub async fn list(&self, filter: &ClientFilter) -> Result<Vec<ClientView>> {
        let clients = self.store.list_clients(filter).await?;
        Ok(clients.into_iter().map(ClientView::from).collect())
    }

    /// Create a draft client; the wizard starts at its first step
    pub async fn start_onboarding(
        &self,
        request: StartOnboardingRequest,
        user: &AuthenticatedUser,
    ) -> Result<ClientView> {
        validate(&request)?;

        let mut client = Client::new(
            request.kind,
            request.email.trim().to_lowercase(),
            request.display_name.trim().to_string(),
            request.country,
        );
        client.owner = Some(user.subject.clone());
        self.store.insert_client(&client).await?;

        info!("Started {} onboarding for client {}", client.kind, client.id);
        Ok(client.into())
    }

    pub async fn submit_step(
        &self,
        id: Uuid,
        data: StepData,
        user: &AuthenticatedUser,
    ) -> Result<ClientView> {
        let mut client = self.get_for(id, user).await?;
        if client.status != ClientStatus::Draft {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}; steps can only change while DRAFT",
                id, client.status
            )));
        }

        let step = data.step();
        client
            .application
            .submit_step(data, Utc::now().date_naive())?;
        client.updated_at = Utc::now();
        self.store.update_client(&client).await?;

        info!("Client {} completed onboarding step {}", id, step);
        Ok(client.into())
    }

    /// Screen the completed application and hand it to compliance review
    pub async fn submit_application(&self, id: Uuid, user: &AuthenticatedUser) -> Result<ClientView> {
        let mut client = self.get_for(id, user).await?;
        if client.status != ClientStatus::Draft {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}; only DRAFT applications can be submitted",
                id, client.status
            )));
        }
        if let Some(missing) = client.application.next_step() {
            return Err(BackofficeError::Validation(format!(
                "onboarding step {} is missing",
                missing
            )));
        }

        let result = self.screener.screen_parties(&self.screening_requests(&client))?;
        let risk_level = match result.status {
            ScreeningStatus::Blocked | ScreeningStatus::ManualReview => RiskLevel::High,
            ScreeningStatus::Flagged => RiskLevel::Medium,
            ScreeningStatus::Clear => RiskLevel::Low,
        };

        let now = Utc::now();
        client.risk_level = Some(risk_level);
        client.status = ClientStatus::Submitted;
        client.submitted_at = Some(now);
        client.updated_at = now;

        let severity = match result.status {
            ScreeningStatus::Blocked => Some(AlertSeverity::High),
            ScreeningStatus::ManualReview => Some(AlertSeverity::Medium),
            _ => None,
        };
        let alert = severity.map(|severity| {
            AmlAlert::open(
                AlertKind::Kyc,
                severity,
                client.id,
                None,
                result.risk_score,
                result.reasons.clone(),
            )
        });

        // Status and alert land together; a blocked applicant is never SUBMITTED without one
        self.store.commit_submission(&client, alert.as_ref()).await?;

        if let Some(alert) = &alert {
            record_alert_opened(alert);
            warn!(
                "KYC alert {} opened for client {} (score {})",
                alert.id, client.id, result.risk_score
            );
        }

        ONBOARDING_SUBMISSIONS
            .with_label_values(&[client.kind.as_str(), risk_level.as_str()])
            .inc();
        info!(
            "Client {} submitted application, risk {} ({:?})",
            client.id, risk_level, result.status
        );
        Ok(client.into())
    }

    // One request per screened name; the applicant carries countries and identifiers
    fn screening_requests(&self, client: &Client) -> Vec<PartyScreeningRequest> {
        let application = &client.application;
        let mut countries = application.screened_countries();
        if !countries.contains(&client.country) {
            countries.push(client.country.clone());
        }

        let mut names = application.screened_names();
        if names.is_empty() {
            names.push(client.display_name.clone());
        }

        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                if i == 0 {
                    let aliases = if client.display_name.eq_ignore_ascii_case(&name) {
                        vec![]
                    } else {
                        vec![client.display_name.clone()]
                    };
                    PartyScreeningRequest {
                        name,
                        aliases,
                        countries: countries.clone(),
                        identifiers: application.screened_identifiers(),
                    }
                } else {
                    PartyScreeningRequest {
                        name,
                        ..Default::default()
                    }
                }
            })
            .collect()
    }

    pub async fn decide(&self, id: Uuid, request: DecisionRequest, actor: &str) -> Result<ClientView> {
        validate(&request)?;

        let mut client = self.get(id).await?;
        if client.status != ClientStatus::Submitted {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}; only SUBMITTED applications can be decided",
                id, client.status
            )));
        }

        if request.decision == Decision::Approve {
            let open = self
                .store
                .list_alerts(&AlertFilter {
                    status: Some(AlertStatus::Open),
                    kind: Some(AlertKind::Kyc),
                    client_id: Some(id),
                    transaction_id: None,
                    page: Page::default(),
                })
                .await?;
            if !open.is_empty() {
                return Err(BackofficeError::InvalidState(format!(
                    "client {} has {} open KYC alert(s)",
                    id,
                    open.len()
                )));
            }
        }

        let now = Utc::now();
        client.status = match request.decision {
            Decision::Approve => ClientStatus::Approved,
            Decision::Reject => ClientStatus::Rejected,
        };
        client.decision_note = request.note;
        client.decided_at = Some(now);
        client.updated_at = now;
        self.store.update_client(&client).await?;

        info!("Client {} {} by {}", id, client.status, actor);
        Ok(client.into())
    }

    pub async fn suspend(&self, id: Uuid, request: StatusChangeRequest, actor: &str) -> Result<ClientView> {
        self.change_status(id, request, actor, ClientStatus::Approved, ClientStatus::Suspended)
            .await
    }

    pub async fn reactivate(&self, id: Uuid, request: StatusChangeRequest, actor: &str) -> Result<ClientView> {
        self.change_status(id, request, actor, ClientStatus::Suspended, ClientStatus::Approved)
            .await
    }

    async fn change_status(
        &self,
        id: Uuid,
        request: StatusChangeRequest,
        actor: &str,
        from: ClientStatus,
        to: ClientStatus,
    ) -> Result<ClientView> {
        validate(&request)?;

        let mut client = self.get(id).await?;
        if client.status != from {
            return Err(BackofficeError::InvalidState(format!(
                "client {} is {}, expected {}",
                id, client.status, from
            )));
        }

        client.status = to;
        client.decision_note = Some(request.reason);
        client.updated_at = Utc::now();
        self.store.update_client(&client).await?;

        info!("Client {} {} -> {} by {}", id, from, to, actor);
        Ok(client.into())
    }

    /// Reject a submitted client after a confirmed KYC alert
    pub(crate) async fn reject_after_alert(&self, id: Uuid, note: String) -> Result<()> {
        let mut client = self.get(id).await?;
        if client.status != ClientStatus::Submitted {
            return Ok(());
        }
        let now = Utc::now();
        client.status = ClientStatus::Rejected;
        client.decision_note = Some(note);
        client.decided_at = Some(now);
        client.updated_at = now;
        self.store.update_client(&client).await?;
        info!("Client {} rejected after confirmed KYC alert", id);
        Ok(())
    }

    /// What the platform owes the client, per asset
    pub async fn balances(&self, id: Uuid) -> Result<ClientBalances> {
        self.get(id).await?;
        let entries = self.store.client_ledger_entries(id).await?;
        let prefix = accounts::client_prefix(id);

        // Client accounts are credit-normal
        let balances = balance_lines(&entries, Some(&prefix))
            .into_iter()
            .map(|mut line| {
                line.balance = -line.balance;
                line
            })
            .collect();

        Ok(ClientBalances {
            client_id: id,
            balances,
        })
    }
}
