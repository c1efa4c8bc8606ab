use backoffice_core::{
    AlertKind, AlertStatus, AmlAlert, Asset, Client, ClientKind, ClientStatus, LedgerEntry,
    OnboardingStep, PayoutDestination, Transaction, TransactionAction, TransactionStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// limit/offset paging shared by list endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

// ===== Clients & onboarding =====

/// Start the onboarding wizard
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct StartOnboardingRequest {
    pub kind: ClientKind,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 200))]
    pub display_name: String,
    #[validate(custom = "validate_country_code")]
    pub country: String,
}

/// Client plus wizard progress
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientView {
    #[serde(flatten)]
    pub client: Client,
    pub next_step: Option<OnboardingStep>,
    pub completed_steps: usize,
    pub total_steps: usize,
}

impl From<Client> for ClientView {
    fn from(client: Client) -> Self {
        let (completed_steps, total_steps) = client.application.progress();
        Self {
            next_step: client.application.next_step(),
            completed_steps,
            total_steps,
            client,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct StatusChangeRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub status: Option<ClientStatus>,
    pub kind: Option<ClientKind>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientFilter {
    pub status: Option<ClientStatus>,
    pub kind: Option<ClientKind>,
    /// Case-insensitive substring of display name or email
    pub search: Option<String>,
    pub page: Page,
}

impl From<ClientQuery> for ClientFilter {
    fn from(query: ClientQuery) -> Self {
        Self {
            status: query.status,
            kind: query.kind,
            search: query
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            page: Page::new(query.limit, query.offset),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceLine {
    pub account: String,
    pub asset: Asset,
    pub balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientBalances {
    pub client_id: Uuid,
    pub balances: Vec<BalanceLine>,
}

// ===== Wallets =====

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateWalletRequest {
    pub asset: Asset,
    #[validate(length(min = 1, max = 32))]
    pub network: String,
}

// ===== Transactions =====

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateTransactionRequest {
    pub client_id: Uuid,
    pub wallet_id: Uuid,
    #[validate(custom = "validate_positive")]
    pub source_amount: Decimal,
    pub target_currency: Asset,
    #[validate]
    pub payout_destination: PayoutDestinationRequest,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PayoutDestinationRequest {
    #[validate(length(min = 1, max = 200))]
    pub holder_name: String,
    #[validate(length(min = 15, max = 34))]
    pub iban: String,
    #[validate(length(min = 8, max = 11))]
    pub bic: Option<String>,
}

impl From<PayoutDestinationRequest> for PayoutDestination {
    fn from(request: PayoutDestinationRequest) -> Self {
        PayoutDestination {
            holder_name: request.holder_name.trim().to_string(),
            iban: request.iban.replace(' ', "").to_uppercase(),
            bic: request.bic.map(|b| b.trim().to_uppercase()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub status: Option<TransactionStatus>,
    pub client_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub client_id: Option<Uuid>,
    pub page: Page,
}

impl From<TransactionQuery> for TransactionFilter {
    fn from(query: TransactionQuery) -> Self {
        Self {
            status: query.status,
            client_id: query.client_id,
            page: Page::new(query.limit, query.offset),
        }
    }
}

/// Transaction plus what an admin may do next
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub allowed_actions: Vec<TransactionAction>,
}

impl From<Transaction> for TransactionView {
    fn from(transaction: Transaction) -> Self {
        Self {
            allowed_actions: backoffice_core::state::allowed_actions(transaction.status),
            transaction,
        }
    }
}

/// Admin action on a transaction
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ActionRequest {
    pub action: TransactionAction,
    #[validate(length(min = 8, max = 128))]
    pub idempotency_key: String,
    /// Optimistic concurrency guard
    pub expected_version: Option<i64>,
    #[validate(length(min = 1, max = 2000))]
    pub reason: Option<String>,
    /// mark_complete without a COMPLETED payout status
    #[serde(default)]
    pub force: bool,
    #[validate(length(min = 1, max = 128))]
    pub deposit_tx_hash: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub source_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub transaction: TransactionView,
    pub entries: Vec<LedgerEntry>,
    pub alert: Option<AmlAlert>,
    /// Served from the idempotency store
    pub replayed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub transaction_id: Uuid,
    pub entries: Vec<LedgerEntry>,
    pub balances: Vec<BalanceLine>,
}

/// Stored outcome of an action, keyed by idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub transaction_id: Uuid,
    pub action: TransactionAction,
    /// SHA-256 over transaction id, action and payload
    pub fingerprint: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ===== Alerts =====

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    pub status: Option<AlertStatus>,
    pub kind: Option<AlertKind>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub kind: Option<AlertKind>,
    pub client_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub page: Page,
}

impl From<AlertQuery> for AlertFilter {
    fn from(query: AlertQuery) -> Self {
        Self {
            status: query.status,
            kind: query.kind,
            client_id: None,
            transaction_id: None,
            page: Page::new(query.limit, query.offset),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Dismissed,
    Confirmed,
}

impl From<Resolution> for AlertStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Dismissed => AlertStatus::Dismissed,
            Resolution::Confirmed => AlertStatus::Confirmed,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ResolveAlertRequest {
    pub resolution: Resolution,
    #[validate(length(min = 1, max = 2000))]
    pub note: String,
    /// Falls back to the authenticated user
    pub resolved_by: Option<String>,
}

// ===== Outbox & stats =====

#[derive(Debug, Default, Deserialize)]
pub struct OutboxQuery {
    pub status: Option<crate::outbox::OutboxStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    pub clients_by_status: BTreeMap<String, i64>,
    pub transactions_by_status: BTreeMap<String, i64>,
    pub open_alerts: i64,
    pub outbox_by_status: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub storage: String,
    pub providers: String,
    pub sanctions_entries: usize,
}

// ===== Validators =====

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_positive() && !amount.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

fn validate_country_code(country: &str) -> Result<(), ValidationError> {
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("iso_country_code"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_page_clamps() {
        let page = Page::new(Some(10_000), Some(-5));
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.offset, 0);
        assert_eq!(Page::new(Some(2), Some(1)).apply(vec![1, 2, 3, 4]), vec![2, 3]);
    }

    #[test]
    fn test_onboarding_request_validation() {
        let request = StartOnboardingRequest {
            kind: ClientKind::Individual,
            email: "not-an-email".to_string(),
            display_name: "Ada".to_string(),
            country: "gb".to_string(),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("country"));
    }

    #[test]
    fn test_transaction_request_rejects_zero_amount() {
        let request = CreateTransactionRequest {
            client_id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            source_amount: dec!(0),
            target_currency: Asset::EUR,
            payout_destination: PayoutDestinationRequest {
                holder_name: "Ada Lovelace".to_string(),
                iban: "DE89 3704 0044 0532 0130 00".to_string(),
                bic: None,
            },
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_iban_is_normalized() {
        let destination: PayoutDestination = PayoutDestinationRequest {
            holder_name: " Ada Lovelace ".to_string(),
            iban: "de89 3704 0044 0532 0130 00".to_string(),
            bic: Some("cobadeffxxx".to_string()),
        }
        .into();
        assert_eq!(destination.iban, "DE89370400440532013000");
        assert_eq!(destination.bic.as_deref(), Some("COBADEFFXXX"));
    }
}
