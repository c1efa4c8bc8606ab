use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreeningStatus {
    Clear,
    Flagged,
    ManualReview,
    Blocked,
}

/// What the caller should do with the screened party or transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskDecision {
    Approve,
    Review,
    Reject,
}

impl From<ScreeningStatus> for RiskDecision {
    fn from(status: ScreeningStatus) -> Self {
        match status {
            ScreeningStatus::Blocked => RiskDecision::Reject,
            ScreeningStatus::ManualReview => RiskDecision::Review,
            ScreeningStatus::Clear | ScreeningStatus::Flagged => RiskDecision::Approve,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub screening_id: Uuid,
    pub status: ScreeningStatus,
    pub matched_lists: Vec<String>,
    pub match_details: Vec<MatchDetail>,
    /// Human-readable findings, one per rule that fired
    pub reasons: Vec<String>,
    pub risk_score: u8, // 0-100
    pub timestamp: DateTime<Utc>,
}

impl ScreeningResult {
    pub fn decision(&self) -> RiskDecision {
        self.status.into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    pub list_name: String,
    pub entry_id: String,
    pub matched_field: String,
    pub confidence: f64, // 0.0-1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SanctionsList {
    OFAC,          // US Office of Foreign Assets Control
    EU,            // European Union
    UN,            // United Nations
    UkHmt,         // UK His Majesty's Treasury
    Local(String), // Internal or provider-specific lists
}

impl SanctionsList {
    pub fn as_str(&self) -> &str {
        match self {
            SanctionsList::OFAC => "OFAC",
            SanctionsList::EU => "EU",
            SanctionsList::UN => "UN",
            SanctionsList::UkHmt => "UK_HMT",
            SanctionsList::Local(name) => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionsEntry {
    pub id: String,
    pub list: SanctionsList,
    pub entity_type: EntityType,
    pub names: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub programs: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EntityType {
    Individual,
    Organization,
    Jurisdiction,
    CryptoWallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    pub id_type: IdentifierType,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IdentifierType {
    Passport,
    NationalId,
    TaxId,
    RegisterNumber,
    Iban,
    Swift,
    WalletAddress,
}

/// KYC/KYB subject: an applicant, a company or one of its owners
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartyScreeningRequest {
    pub name: String,
    pub aliases: Vec<String>,
    pub countries: Vec<String>,
    pub identifiers: Vec<String>,
}

/// KYT subject: an incoming crypto deposit bound for a bank payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionScreeningRequest {
    pub transaction_id: Uuid,
    pub asset: String,
    pub network: String,
    pub amount: Decimal,
    /// USD estimate of `amount`; `None` when no quote was available
    pub estimated_value_usd: Option<Decimal>,
    pub deposit_address: String,
    pub source_address: Option<String>,
    pub client_country: String,
    /// Country of the payout bank account (IBAN prefix)
    pub destination_country: Option<String>,
    pub client_high_risk: bool,
}
