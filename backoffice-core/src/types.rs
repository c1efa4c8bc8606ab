//! Core types for the back office
//!
//! Enums stored in text columns expose `as_str` and `FromStr` so the storage
//! layer can map rows without a database-specific type mapping.

use crate::error::{Error, Result};
use crate::onboarding::Application;
use crate::state::TransactionStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// text form is fixed.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Column / wire value
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(Error::unknown($kind, s)),
                }
            }
        }
    };
}

/// Asset or currency handled by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Asset {
    /// Tether
    USDT,
    /// USD Coin
    USDC,
    /// Bitcoin
    BTC,
    /// Ether
    ETH,
    /// Euro
    EUR,
    /// US Dollar
    USD,
    /// British Pound
    GBP,
}

text_enum!(Asset, "asset", {
    USDT => "USDT",
    USDC => "USDC",
    BTC => "BTC",
    ETH => "ETH",
    EUR => "EUR",
    USD => "USD",
    GBP => "GBP",
});

impl Asset {
    /// Bank currency rather than a crypto asset
    pub fn is_fiat(&self) -> bool {
        matches!(self, Asset::EUR | Asset::USD | Asset::GBP)
    }

    /// Decimal places amounts are rounded to
    pub fn scale(&self) -> u32 {
        match self {
            Asset::EUR | Asset::USD | Asset::GBP => 2,
            Asset::USDT | Asset::USDC => 6,
            Asset::BTC => 8,
            Asset::ETH => 18,
        }
    }

    /// Round an amount to this asset's scale (banker's rounding)
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp(self.scale())
    }
}

/// Individual (KYC) or business (KYB) client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientKind {
    /// Natural person
    Individual,
    /// Legal entity
    Business,
}

text_enum!(ClientKind, "client kind", {
    Individual => "INDIVIDUAL",
    Business => "BUSINESS",
});

/// Client lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientStatus {
    /// Onboarding wizard in progress
    Draft,
    /// Application submitted, awaiting review
    Submitted,
    /// Allowed to transact
    Approved,
    /// Application refused
    Rejected,
    /// Approved client blocked by an admin
    Suspended,
}

text_enum!(ClientStatus, "client status", {
    Draft => "DRAFT",
    Submitted => "SUBMITTED",
    Approved => "APPROVED",
    Rejected => "REJECTED",
    Suspended => "SUSPENDED",
});

/// Risk rating assigned at screening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// No findings
    Low,
    /// Findings below the review threshold
    Medium,
    /// Manual review or block
    High,
}

text_enum!(RiskLevel, "risk level", {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

/// Onboarded (or onboarding) client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Client ID
    pub id: Uuid,
    /// Individual or business
    pub kind: ClientKind,
    /// Lifecycle status
    pub status: ClientStatus,
    /// Contact email
    pub email: String,
    /// Token subject of the applicant who started onboarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Person or company name shown in the console
    pub display_name: String,
    /// ISO 3166 alpha-2 country of residence or incorporation
    pub country: String,
    /// Set when the application is screened
    pub risk_level: Option<RiskLevel>,
    /// Wizard progress
    pub application: Application,
    /// Admin note attached to the last decision
    pub decision_note: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
    /// When the application was submitted
    pub submitted_at: Option<DateTime<Utc>>,
    /// When an admin approved or rejected it
    pub decided_at: Option<DateTime<Utc>>,
}

impl Client {
    /// New draft client with an empty application
    pub fn new(kind: ClientKind, email: String, display_name: String, country: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            kind,
            status: ClientStatus::Draft,
            email,
            owner: None,
            display_name,
            country,
            risk_level: None,
            application: Application::new(kind),
            decision_note: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            decided_at: None,
        }
    }
}

/// Custody wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    /// Accepts deposits
    Active,
    /// Blocked by an admin
    Frozen,
}

text_enum!(WalletStatus, "wallet status", {
    Active => "ACTIVE",
    Frozen => "FROZEN",
});

/// Deposit wallet held at the custody provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID
    pub id: Uuid,
    /// Owner
    pub client_id: Uuid,
    /// Asset the address receives
    pub asset: Asset,
    /// Chain name, e.g. `ethereum`
    pub network: String,
    /// Deposit address
    pub address: String,
    /// Custody provider's wallet reference
    pub custody_reference: String,
    /// Status
    pub status: WalletStatus,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Bank account a payout is sent to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutDestination {
    /// Account holder
    pub holder_name: String,
    /// IBAN
    pub iban: String,
    /// BIC/SWIFT code
    pub bic: Option<String>,
}

/// Crypto-in, fiat-out transaction driven by admin actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: Uuid,
    /// Client
    pub client_id: Uuid,
    /// Deposit wallet
    pub wallet_id: Uuid,
    /// Deposited asset
    pub source_asset: Asset,
    /// Deposited amount
    pub source_amount: Decimal,
    /// Payout currency
    pub target_currency: Asset,
    /// Fiat received from the swap
    pub target_amount: Option<Decimal>,
    /// Swap rate, target per source unit
    pub fx_rate: Option<Decimal>,
    /// Platform fee in target currency
    pub fee_amount: Option<Decimal>,
    /// Where the payout goes
    pub payout_destination: PayoutDestination,
    /// On-chain hash of the deposit
    pub deposit_tx_hash: Option<String>,
    /// Swap provider reference
    pub swap_reference: Option<String>,
    /// Payout provider reference
    pub payout_reference: Option<String>,
    /// Pipeline status
    pub status: TransactionStatus,
    /// Why the transaction failed
    pub failure_reason: Option<String>,
    /// Incremented on every committed action
    pub version: i64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Fiat amount actually paid out: swap proceeds less the platform fee
    pub fn net_payout(&self) -> Option<Decimal> {
        let target = self.target_amount?;
        Some(target - self.fee_amount.unwrap_or(Decimal::ZERO))
    }
}

/// KYC (client) or KYT (transaction) alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// Raised at onboarding screening
    Kyc,
    /// Raised at deposit screening
    Kyt,
}

text_enum!(AlertKind, "alert kind", {
    Kyc => "KYC",
    Kyt => "KYT",
});

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational
    Low,
    /// Needs review before the flow continues
    Medium,
    /// Blocked by screening
    High,
}

text_enum!(AlertSeverity, "alert severity", {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

/// Alert workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    /// Awaiting a compliance officer
    Open,
    /// False positive
    Dismissed,
    /// Finding upheld
    Confirmed,
}

text_enum!(AlertStatus, "alert status", {
    Open => "OPEN",
    Dismissed => "DISMISSED",
    Confirmed => "CONFIRMED",
});

/// AML alert raised by screening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmlAlert {
    /// Alert ID
    pub id: Uuid,
    /// KYC or KYT
    pub kind: AlertKind,
    /// Severity
    pub severity: AlertSeverity,
    /// Workflow status
    pub status: AlertStatus,
    /// Client concerned
    pub client_id: Uuid,
    /// Transaction concerned (KYT only)
    pub transaction_id: Option<Uuid>,
    /// Screening score 0-100
    pub risk_score: u8,
    /// Human-readable findings
    pub reasons: Vec<String>,
    /// Resolution note
    pub resolution_note: Option<String>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// When it was resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AmlAlert {
    /// New open alert
    pub fn open(
        kind: AlertKind,
        severity: AlertSeverity,
        client_id: Uuid,
        transaction_id: Option<Uuid>,
        risk_score: u8,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            severity,
            status: AlertStatus::Open,
            client_id,
            transaction_id,
            risk_score,
            reasons,
            resolution_note: None,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Still awaiting resolution
    pub fn is_open(&self) -> bool {
        self.status == AlertStatus::Open
    }
}
