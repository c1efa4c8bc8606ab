pub mod http;
pub mod sandbox;

use crate::config::{ProviderMode, ProvidersConfig};
use crate::errors::Result;
use async_trait::async_trait;
use backoffice_core::{Asset, PayoutDestination};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Idempotency key of the action; the provider deduplicates on it
    pub client_reference: String,
    pub transaction_id: Uuid,
    pub source_asset: Asset,
    pub source_amount: Decimal,
    pub target_currency: Asset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub reference: String,
    pub rate: Decimal,
    pub source_amount: Decimal,
    pub target_amount: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub client_reference: String,
    pub transaction_id: Uuid,
    pub amount: Decimal,
    pub currency: Asset,
    pub destination: PayoutDestination,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "PENDING"),
            PayoutStatus::Processing => write!(f, "PROCESSING"),
            PayoutStatus::Completed => write!(f, "COMPLETED"),
            PayoutStatus::Failed => write!(f, "FAILED"),
            PayoutStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutResult {
    pub reference: String,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRequest {
    pub client_reference: String,
    pub client_id: Uuid,
    pub asset: Asset,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyAddress {
    pub address: String,
    pub custody_reference: String,
    pub network: String,
}

/// Crypto to fiat conversion
#[async_trait]
pub trait SwapProvider: Send + Sync {
    /// Indicative rate, `target` units per `source` unit
    async fn quote(&self, source: Asset, target: Asset) -> Result<Decimal>;
    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult>;
}

/// Bank payouts
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResult>;
    async fn payout_status(&self, reference: &str) -> Result<PayoutStatus>;
    async fn cancel_payout(&self, reference: &str) -> Result<()>;
}

/// Deposit addresses
#[async_trait]
pub trait CustodyProvider: Send + Sync {
    async fn create_address(&self, request: &AddressRequest) -> Result<CustodyAddress>;
}

/// The three providers a deployment talks to
#[derive(Clone)]
pub struct ProviderSet {
    pub mode: ProviderMode,
    pub swap: Arc<dyn SwapProvider>,
    pub payout: Arc<dyn PayoutProvider>,
    pub custody: Arc<dyn CustodyProvider>,
}

impl ProviderSet {
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        match config.mode {
            ProviderMode::Live => {
                let swap = http::HttpSwapProvider::new(
                    &config.swap_base_url,
                    &config.api_key,
                    config.timeout_secs,
                )?;
                let payout = http::HttpPayoutProvider::new(
                    &config.payout_base_url,
                    &config.api_key,
                    config.timeout_secs,
                )?;
                let custody = http::HttpCustodyProvider::new(
                    &config.custody_base_url,
                    &config.api_key,
                    config.timeout_secs,
                )?;
                Ok(Self {
                    mode: ProviderMode::Live,
                    swap: Arc::new(swap),
                    payout: Arc::new(payout),
                    custody: Arc::new(custody),
                })
            }
            ProviderMode::Sandbox => Ok(Self::sandbox(
                config.sandbox_latency_ms,
                config.sandbox_success_rate,
            )),
        }
    }

    pub fn sandbox(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            mode: ProviderMode::Sandbox,
            swap: Arc::new(sandbox::SandboxSwapProvider::new(latency_ms, success_rate)),
            payout: Arc::new(sandbox::SandboxPayoutProvider::new(latency_ms, success_rate)),
            custody: Arc::new(sandbox::SandboxCustodyProvider::new(latency_ms, success_rate)),
        }
    }
}
