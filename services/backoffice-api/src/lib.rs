pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod outbox;
pub mod providers;
pub mod retry;
pub mod services;
pub mod store;

pub use config::Config;
pub use errors::{BackofficeError, Result};
pub use services::Services;

use crate::config::StorageBackend;
use crate::providers::ProviderSet;
use crate::store::{memory::MemoryStore, postgres::PgStore, Store};
use compliance_service::{ComplianceScreener, SanctionsEngine, ScreeningThresholds};
use std::sync::Arc;
use tracing::info;

/// Storage backend selected by configuration; migrations run when asked
pub async fn connect_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.database.backend {
        StorageBackend::Postgres => {
            let store = PgStore::connect(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await?;
            if config.database.run_migrations {
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Sanctions lists and screening thresholds from configuration
pub fn build_screener(config: &Config) -> Result<Arc<ComplianceScreener>> {
    let sanctions = Arc::new(SanctionsEngine::new(config.compliance.fuzzy_threshold));
    if let Some(path) = &config.compliance.sanctions_file {
        let loaded = sanctions.load_json_file(path)?;
        info!("Loaded {} sanctions entries from {}", loaded, path);
    }

    let thresholds = ScreeningThresholds {
        auto_block: config.compliance.auto_block_threshold,
        manual_review: config.compliance.manual_review_threshold,
        large_transaction_usd: config
            .large_transaction_threshold()
            .map_err(BackofficeError::Validation)?,
        high_risk_countries: config.compliance.high_risk_countries.clone(),
    };
    Ok(Arc::new(ComplianceScreener::new(sanctions, thresholds)?))
}

/// Wire storage, screening and providers into the service layer
pub async fn build_services(config: &Config) -> Result<Services> {
    let store = connect_store(config).await?;
    let screener = build_screener(config)?;
    let providers = ProviderSet::from_config(&config.providers)?;
    Ok(Services::new(config, store, providers, screener))
}
