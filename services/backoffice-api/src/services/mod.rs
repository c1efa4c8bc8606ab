pub mod alerts;
pub mod clients;
pub mod transactions;
pub mod wallets;

pub use alerts::AlertService;
pub use clients::ClientService;
pub use transactions::TransactionService;
pub use wallets::WalletService;

use crate::config::Config;
use crate::errors::{BackofficeError, Result};
use crate::metrics::ALERTS_OPENED;
use crate::outbox::Outbox;
use crate::providers::ProviderSet;
use crate::retry::RetryStrategy;
use crate::store::Store;
use backoffice_core::ledger;
use backoffice_core::{AmlAlert, LedgerEntry};
use compliance_service::ComplianceScreener;
use std::sync::Arc;
use validator::Validate;

use crate::models::BalanceLine;

/// Application services shared by the HTTP handlers
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub screener: Arc<ComplianceScreener>,
    pub providers: ProviderSet,
    pub outbox: Outbox,
    pub clients: Arc<ClientService>,
    pub wallets: Arc<WalletService>,
    pub transactions: Arc<TransactionService>,
    pub alerts: Arc<AlertService>,
}

impl Services {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        providers: ProviderSet,
        screener: Arc<ComplianceScreener>,
    ) -> Self {
        let retry = RetryStrategy::new(config.retry.clone());
        let outbox = Outbox::new(store.clone(), retry.clone());

        let clients = Arc::new(ClientService::new(store.clone(), screener.clone()));
        let wallets = Arc::new(WalletService::new(
            store.clone(),
            providers.clone(),
            outbox.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            store.clone(),
            providers.clone(),
            screener.clone(),
            outbox.clone(),
            retry,
            config.fees.platform_fee_bps,
        ));
        let alerts = Arc::new(AlertService::new(
            store.clone(),
            transactions.clone(),
            clients.clone(),
        ));

        Self {
            store,
            screener,
            providers,
            outbox,
            clients,
            wallets,
            transactions,
            alerts,
        }
    }
}

/// Run derive-based request validation, as a 400
pub(crate) fn validate<T: Validate>(request: &T) -> Result<()> {
    request
        .validate()
        .map_err(|e| BackofficeError::Validation(e.to_string()))
}

pub(crate) fn record_alert_opened(alert: &AmlAlert) {
    ALERTS_OPENED
        .with_label_values(&[alert.kind.as_str(), alert.severity.as_str()])
        .inc();
}

/// Non-zero balances, optionally restricted to accounts starting with `prefix`
pub(crate) fn balance_lines(entries: &[LedgerEntry], prefix: Option<&str>) -> Vec<BalanceLine> {
    ledger::balances(entries)
        .into_iter()
        .filter(|((account, _), _)| prefix.map_or(true, |p| account.starts_with(p)))
        .filter(|(_, balance)| !balance.is_zero())
        .map(|((account, asset), balance)| BalanceLine {
            account,
            asset,
            balance,
        })
        .collect()
}
