use super::{
    AddressRequest, CustodyAddress, CustodyProvider, PayoutProvider, PayoutRequest, PayoutResult,
    PayoutStatus, SwapProvider, SwapRequest, SwapResult,
};
use crate::errors::{BackofficeError, Result};
use async_trait::async_trait;
use backoffice_core::Asset;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Latency and random failure shared by the sandbox providers
#[derive(Debug, Clone, Copy)]
struct Simulation {
    latency_ms: u64,
    success_rate: f64,
}

impl Simulation {
    async fn call(&self, provider: &str) -> Result<()> {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() <= self.success_rate {
            Ok(())
        } else {
            warn!("Sandbox {}: simulated failure", provider);
            Err(BackofficeError::ProviderUnavailable {
                provider: provider.to_string(),
                message: "Simulated provider failure".to_string(),
            })
        }
    }
}

/// Fixed sandbox rate, fiat per crypto unit
pub fn sandbox_rate(source: Asset, target: Asset) -> Option<Decimal> {
    let rate = match (source, target) {
        (Asset::USDT | Asset::USDC, Asset::USD) => dec!(1.00),
        (Asset::USDT | Asset::USDC, Asset::EUR) => dec!(0.92),
        (Asset::USDT | Asset::USDC, Asset::GBP) => dec!(0.79),
        (Asset::BTC, Asset::USD) => dec!(65000),
        (Asset::BTC, Asset::EUR) => dec!(60000),
        (Asset::BTC, Asset::GBP) => dec!(51000),
        (Asset::ETH, Asset::USD) => dec!(3200),
        (Asset::ETH, Asset::EUR) => dec!(2950),
        (Asset::ETH, Asset::GBP) => dec!(2500),
        _ => return None,
    };
    Some(rate)
}

pub struct SandboxSwapProvider {
    simulation: Simulation,
    // client_reference -> result
    swaps: Arc<RwLock<HashMap<String, SwapResult>>>,
}

impl SandboxSwapProvider {
    pub fn new(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            simulation: Simulation {
                latency_ms,
                success_rate,
            },
            swaps: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl SwapProvider for SandboxSwapProvider {
    async fn quote(&self, source: Asset, target: Asset) -> Result<Decimal> {
        sandbox_rate(source, target).ok_or_else(|| BackofficeError::ProviderRejected {
            provider: "swap".to_string(),
            message: format!("no market for {}/{}", source, target),
        })
    }

    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
        if let Some(existing) = self.swaps.read().await.get(&request.client_reference) {
            info!("Sandbox swap: replaying {}", existing.reference);
            return Ok(existing.clone());
        }

        self.simulation.call("swap").await?;

        let rate = self.quote(request.source_asset, request.target_currency).await?;
        let result = SwapResult {
            reference: format!("SBX-SWP-{}", Uuid::new_v4().simple()),
            rate,
            source_amount: request.source_amount,
            target_amount: request.target_currency.round(request.source_amount * rate),
            executed_at: Utc::now(),
        };

        info!(
            "Sandbox swap: {} {} -> {} {}",
            request.source_amount, request.source_asset, result.target_amount, request.target_currency
        );

        let mut swaps = self.swaps.write().await;
        Ok(swaps
            .entry(request.client_reference.clone())
            .or_insert(result)
            .clone())
    }
}

#[derive(Debug, Clone)]
struct SandboxPayout {
    result: PayoutResult,
    // None once the status has been overridden
    settles_at: Option<DateTime<Utc>>,
}

pub struct SandboxPayoutProvider {
    simulation: Simulation,
    settlement_delay: chrono::Duration,
    // client_reference -> payout reference
    by_client_reference: Arc<RwLock<HashMap<String, String>>>,
    payouts: Arc<RwLock<HashMap<String, SandboxPayout>>>,
}

impl SandboxPayoutProvider {
    pub fn new(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            simulation: Simulation {
                latency_ms,
                success_rate,
            },
            settlement_delay: chrono::Duration::zero(),
            by_client_reference: Arc::new(RwLock::new(HashMap::new())),
            payouts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Payouts report PROCESSING until `delay` has elapsed
    pub fn with_settlement_delay(mut self, delay: Duration) -> Self {
        self.settlement_delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self
    }

    /// Pin a payout's status, e.g. to simulate a bank return
    pub async fn set_status(&self, reference: &str, status: PayoutStatus) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        let payout = payouts.get_mut(reference).ok_or_else(|| not_found(reference))?;
        payout.result.status = status;
        payout.settles_at = None;
        Ok(())
    }
}

fn not_found(reference: &str) -> BackofficeError {
    BackofficeError::ProviderRejected {
        provider: "payout".to_string(),
        message: format!("payout not found: {}", reference),
    }
}

#[async_trait]
impl PayoutProvider for SandboxPayoutProvider {
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutResult> {
        if let Some(reference) = self.by_client_reference.read().await.get(&request.client_reference) {
            if let Some(existing) = self.payouts.read().await.get(reference) {
                info!("Sandbox payout: replaying {}", reference);
                return Ok(existing.result.clone());
            }
        }

        self.simulation.call("payout").await?;

        let now = Utc::now();
        let result = PayoutResult {
            reference: format!("SBX-PAY-{}", Uuid::new_v4().simple()),
            status: PayoutStatus::Processing,
            created_at: now,
        };

        info!(
            "Sandbox payout: {} {} to {} ({})",
            request.amount, request.currency, request.destination.holder_name, result.reference
        );

        self.payouts.write().await.insert(
            result.reference.clone(),
            SandboxPayout {
                result: result.clone(),
                settles_at: Some(now + self.settlement_delay),
            },
        );
        self.by_client_reference
            .write()
            .await
            .insert(request.client_reference.clone(), result.reference.clone());

        Ok(result)
    }

    async fn payout_status(&self, reference: &str) -> Result<PayoutStatus> {
        let mut payouts = self.payouts.write().await;
        let payout = payouts.get_mut(reference).ok_or_else(|| not_found(reference))?;

        if let Some(settles_at) = payout.settles_at {
            if Utc::now() >= settles_at && payout.result.status == PayoutStatus::Processing {
                payout.result.status = PayoutStatus::Completed;
                payout.settles_at = None;
            }
        }
        Ok(payout.result.status)
    }

    async fn cancel_payout(&self, reference: &str) -> Result<()> {
        self.simulation.call("payout").await?;

        let mut payouts = self.payouts.write().await;
        let payout = payouts.get_mut(reference).ok_or_else(|| not_found(reference))?;
        match payout.result.status {
            PayoutStatus::Completed => Err(BackofficeError::ProviderRejected {
                provider: "payout".to_string(),
                message: format!("payout {} already completed", reference),
            }),
            _ => {
                payout.result.status = PayoutStatus::Cancelled;
                payout.settles_at = None;
                info!("Sandbox payout: cancelled {}", reference);
                Ok(())
            }
        }
    }
}

pub struct SandboxCustodyProvider {
    simulation: Simulation,
    addresses: Arc<RwLock<HashMap<String, CustodyAddress>>>,
}

impl SandboxCustodyProvider {
    pub fn new(latency_ms: u64, success_rate: f64) -> Self {
        Self {
            simulation: Simulation {
                latency_ms,
                success_rate,
            },
            addresses: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

const BASE58: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const HEX: &[u8] = b"0123456789abcdef";

fn random_chars(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

fn sandbox_address(network: &str) -> Result<String> {
    match network {
        "ethereum" | "polygon" => Ok(format!("0x{}", random_chars(HEX, 40))),
        "tron" => Ok(format!("T{}", random_chars(BASE58, 33))),
        "bitcoin" => Ok(format!("bc1q{}", random_chars(BECH32, 38))),
        other => Err(BackofficeError::ProviderRejected {
            provider: "custody".to_string(),
            message: format!("unsupported network: {}", other),
        }),
    }
}

#[async_trait]
impl CustodyProvider for SandboxCustodyProvider {
    async fn create_address(&self, request: &AddressRequest) -> Result<CustodyAddress> {
        if let Some(existing) = self.addresses.read().await.get(&request.client_reference) {
            return Ok(existing.clone());
        }

        self.simulation.call("custody").await?;

        let network = request.network.to_lowercase();
        let address = CustodyAddress {
            address: sandbox_address(&network)?,
            custody_reference: format!("SBX-WAL-{}", Uuid::new_v4().simple()),
            network,
        };

        let mut addresses = self.addresses.write().await;
        Ok(addresses
            .entry(request.client_reference.clone())
            .or_insert(address)
            .clone())
    }
}
