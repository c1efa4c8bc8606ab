use crate::error::{ComplianceError, Result};
use crate::sanctions::SanctionsEngine;
use crate::types::{
    MatchDetail, PartyScreeningRequest, SanctionsEntry, ScreeningResult, ScreeningStatus,
    TransactionScreeningRequest,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Score cut-offs and KYT limits
#[derive(Debug, Clone)]
pub struct ScreeningThresholds {
    pub auto_block: u8,
    pub manual_review: u8,
    /// USD value at or above which a deposit counts as large
    pub large_transaction_usd: Decimal,
    pub high_risk_countries: Vec<String>,
}

impl Default for ScreeningThresholds {
    fn default() -> Self {
        Self {
            auto_block: 80,
            manual_review: 50,
            large_transaction_usd: Decimal::from(10_000),
            high_risk_countries: Vec::new(),
        }
    }
}

/// Accumulates findings for one screening run
struct Findings {
    risk_score: u32,
    matched_lists: Vec<String>,
    match_details: Vec<MatchDetail>,
    reasons: Vec<String>,
}

impl Findings {
    fn new() -> Self {
        Self {
            risk_score: 0,
            matched_lists: Vec::new(),
            match_details: Vec::new(),
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, score: u32, reason: String) {
        self.risk_score += score;
        self.reasons.push(reason);
    }

    fn add_matches(&mut self, entries: &[SanctionsEntry], field: &str, confidence: f64) {
        for entry in entries {
            self.matched_lists.push(entry.list.as_str().to_string());
            self.match_details.push(MatchDetail {
                list_name: entry.list.as_str().to_string(),
                entry_id: entry.id.clone(),
                matched_field: field.to_string(),
                confidence,
            });
        }
    }
}

/// ComplianceScreener runs KYC/KYB party screening and KYT deposit screening
pub struct ComplianceScreener {
    sanctions_engine: Arc<SanctionsEngine>,
    thresholds: ScreeningThresholds,
}

impl ComplianceScreener {
    pub fn new(sanctions_engine: Arc<SanctionsEngine>, thresholds: ScreeningThresholds) -> Result<Self> {
        if thresholds.manual_review >= thresholds.auto_block {
            return Err(ComplianceError::ConfigError(format!(
                "manual review threshold {} must be below auto block threshold {}",
                thresholds.manual_review, thresholds.auto_block
            )));
        }
        Ok(Self {
            sanctions_engine,
            thresholds,
        })
    }

    pub fn sanctions(&self) -> &SanctionsEngine {
        &self.sanctions_engine
    }

    /// Screen an applicant, company or owner against sanctions lists
    pub fn screen_party(&self, request: &PartyScreeningRequest) -> Result<ScreeningResult> {
        if request.name.trim().is_empty() {
            return Err(ComplianceError::InvalidInput("name is required".to_string()));
        }

        let mut findings = Findings::new();

        // 1. Name
        let matches = self.sanctions_engine.check_name(&request.name);
        if !matches.is_empty() {
            findings.add(80, format!("name '{}' matches a sanctions entry", request.name));
            findings.add_matches(&matches, "name", 0.95);
            warn!("Sanctions name match for: {}", request.name);
        }

        // 2. Aliases
        for alias in &request.aliases {
            let matches = self.sanctions_engine.check_name(alias);
            if !matches.is_empty() {
                findings.add(70, format!("alias '{}' matches a sanctions entry", alias));
                findings.add_matches(&matches, "alias", 0.90);
            }
        }

        // 3. Countries
        for country in &request.countries {
            self.screen_country(&mut findings, country, "country");
        }

        // 4. Identifiers (document and registration numbers)
        for identifier in &request.identifiers {
            let matches = self.sanctions_engine.check_identifier(identifier);
            if !matches.is_empty() {
                findings.add(90, format!("identifier {} is listed", identifier));
                findings.add_matches(&matches, "identifier", 1.0);
            }
        }

        let result = self.finish(findings);
        if result.status != ScreeningStatus::Clear {
            info!(
                "Party screening {:?} for {} (score: {}, id: {})",
                result.status, request.name, result.risk_score, result.screening_id
            );
        }
        Ok(result)
    }

    /// Screen several parties and keep the worst outcome
    pub fn screen_parties(&self, requests: &[PartyScreeningRequest]) -> Result<ScreeningResult> {
        let mut worst: Option<ScreeningResult> = None;
        let mut reasons = Vec::new();
        for request in requests {
            let result = self.screen_party(request)?;
            reasons.extend(result.reasons.iter().cloned());
            if worst.as_ref().map_or(true, |w| result.risk_score > w.risk_score) {
                worst = Some(result);
            }
        }

        let mut result = worst
            .ok_or_else(|| ComplianceError::InvalidInput("no parties to screen".to_string()))?;
        result.reasons = reasons;
        Ok(result)
    }

    /// Know-your-transaction screening of a crypto deposit
    pub fn screen_transaction(&self, request: &TransactionScreeningRequest) -> Result<ScreeningResult> {
        if request.amount <= Decimal::ZERO {
            return Err(ComplianceError::InvalidInput(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let mut findings = Findings::new();

        // 1. Addresses on identifier lists
        let matches = self.sanctions_engine.check_identifier(&request.deposit_address);
        if !matches.is_empty() {
            findings.add(90, format!("deposit address {} is listed", request.deposit_address));
            findings.add_matches(&matches, "deposit_address", 1.0);
        }
        if let Some(source) = &request.source_address {
            let matches = self.sanctions_engine.check_identifier(source);
            if !matches.is_empty() {
                findings.add(90, format!("source address {} is listed", source));
                findings.add_matches(&matches, "source_address", 1.0);
            }
        }

        // 2. Jurisdictions
        self.screen_country(&mut findings, &request.client_country, "client_country");
        if let Some(destination) = &request.destination_country {
            self.screen_country(&mut findings, destination, "destination_country");
        }

        // 3. Value
        let threshold = self.thresholds.large_transaction_usd;
        match request.estimated_value_usd {
            Some(value) if value >= threshold => {
                findings.add(30, format!("value {} USD at or above {} USD", value, threshold));
            }
            Some(value) if value * Decimal::from(10) >= threshold * Decimal::from(9) => {
                findings.add(
                    25,
                    format!("value {} USD just below the {} USD threshold", value, threshold),
                );
            }
            Some(_) => {}
            None => findings.add(10, "value could not be estimated".to_string()),
        }

        // 4. Round amounts
        let thousand = Decimal::from(1_000);
        if request.amount >= thousand && (request.amount % thousand).is_zero() {
            findings.add(10, format!("round amount {} {}", request.amount, request.asset));
        }

        // 5. Client risk carried over from onboarding
        if request.client_high_risk {
            findings.add(20, "client rated high risk at onboarding".to_string());
        }

        let result = self.finish(findings);
        if result.status != ScreeningStatus::Clear {
            info!(
                "KYT screening {:?} for transaction {} (score: {}, id: {})",
                result.status, request.transaction_id, result.risk_score, result.screening_id
            );
        }
        Ok(result)
    }

    fn screen_country(&self, findings: &mut Findings, country: &str, field: &str) {
        let matches = self.sanctions_engine.check_country(country);
        if !matches.is_empty() {
            findings.add(60, format!("{} {} is a sanctioned jurisdiction", field, country));
            findings.add_matches(&matches, field, 1.0);
        } else if self
            .thresholds
            .high_risk_countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
        {
            findings.add(20, format!("{} {} is high risk", field, country));
            findings.match_details.push(MatchDetail {
                list_name: "HIGH_RISK_COUNTRIES".to_string(),
                entry_id: country.to_string(),
                matched_field: field.to_string(),
                confidence: 1.0,
            });
        }
    }

    fn finish(&self, mut findings: Findings) -> ScreeningResult {
        let risk_score = findings.risk_score.min(100) as u8;

        let status = if risk_score >= self.thresholds.auto_block {
            ScreeningStatus::Blocked
        } else if risk_score >= self.thresholds.manual_review {
            ScreeningStatus::ManualReview
        } else if !findings.reasons.is_empty() {
            ScreeningStatus::Flagged
        } else {
            ScreeningStatus::Clear
        };

        findings.matched_lists.sort();
        findings.matched_lists.dedup();

        ScreeningResult {
            screening_id: Uuid::new_v4(),
            status,
            matched_lists: findings.matched_lists,
            match_details: findings.match_details,
            reasons: findings.reasons,
            risk_score,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, Identifier, IdentifierType, RiskDecision, SanctionsList};
    use rust_decimal_macros::dec;

    const LISTED_WALLET: &str = "0x8589427373D6D84E98730D7795D8f6f8731FDA16";

    fn create_test_engine() -> Arc<SanctionsEngine> {
        let engine = Arc::new(SanctionsEngine::new(0.85));

        let person = SanctionsEntry {
            id: "OFAC-001".to_string(),
            list: SanctionsList::OFAC,
            entity_type: EntityType::Individual,
            names: vec!["John Doe".to_string()],
            aliases: vec!["J. Doe".to_string()],
            countries: vec![],
            identifiers: vec![],
            programs: vec!["SDN".to_string()],
            updated_at: Utc::now(),
        };
        let jurisdiction = SanctionsEntry {
            id: "OFAC-KP".to_string(),
            list: SanctionsList::OFAC,
            entity_type: EntityType::Jurisdiction,
            names: vec!["North Korea".to_string()],
            aliases: vec![],
            countries: vec!["KP".to_string()],
            identifiers: vec![],
            programs: vec!["DPRK".to_string()],
            updated_at: Utc::now(),
        };
        let wallet = SanctionsEntry {
            id: "OFAC-W1".to_string(),
            list: SanctionsList::OFAC,
            entity_type: EntityType::CryptoWallet,
            names: vec!["Mixer".to_string()],
            aliases: vec![],
            countries: vec![],
            identifiers: vec![Identifier {
                id_type: IdentifierType::WalletAddress,
                value: LISTED_WALLET.to_string(),
            }],
            programs: vec!["CYBER2".to_string()],
            updated_at: Utc::now(),
        };

        engine
            .load_list(SanctionsList::OFAC, vec![person, jurisdiction, wallet])
            .unwrap();
        engine
    }

    fn screener() -> ComplianceScreener {
        ComplianceScreener::new(
            create_test_engine(),
            ScreeningThresholds {
                high_risk_countries: vec!["PA".to_string()],
                ..ScreeningThresholds::default()
            },
        )
        .unwrap()
    }

    fn deposit(amount: Decimal, value: Option<Decimal>) -> TransactionScreeningRequest {
        TransactionScreeningRequest {
            transaction_id: Uuid::new_v4(),
            asset: "USDT".to_string(),
            network: "ethereum".to_string(),
            amount,
            estimated_value_usd: value,
            deposit_address: "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
            source_address: None,
            client_country: "DE".to_string(),
            destination_country: Some("DE".to_string()),
            client_high_risk: false,
        }
    }

    #[test]
    fn test_party_blocked_on_name_match() {
        let request = PartyScreeningRequest {
            name: "John Doe".to_string(),
            ..Default::default()
        };

        let result = screener().screen_party(&request).unwrap();
        assert_eq!(result.status, ScreeningStatus::Blocked);
        assert_eq!(result.decision(), RiskDecision::Reject);
        assert!(result.risk_score >= 80);
        assert_eq!(result.matched_lists, vec!["OFAC".to_string()]);
    }

    #[test]
    fn test_party_clear() {
        let request = PartyScreeningRequest {
            name: "Jane Smith".to_string(),
            countries: vec!["US".to_string()],
            ..Default::default()
        };

        let result = screener().screen_party(&request).unwrap();
        assert_eq!(result.status, ScreeningStatus::Clear);
        assert_eq!(result.risk_score, 0);
    }

    #[test]
    fn test_party_high_risk_country_is_flagged() {
        let request = PartyScreeningRequest {
            name: "Jane Smith".to_string(),
            countries: vec!["PA".to_string()],
            ..Default::default()
        };

        let result = screener().screen_party(&request).unwrap();
        assert_eq!(result.status, ScreeningStatus::Flagged);
        assert_eq!(result.decision(), RiskDecision::Approve);
    }

    #[test]
    fn test_party_sanctioned_country_needs_review() {
        let request = PartyScreeningRequest {
            name: "Kim Min".to_string(),
            countries: vec!["KP".to_string()],
            ..Default::default()
        };

        let result = screener().screen_party(&request).unwrap();
        assert_eq!(result.status, ScreeningStatus::ManualReview);
    }

    #[test]
    fn test_worst_party_wins() {
        let parties = vec![
            PartyScreeningRequest {
                name: "Acme GmbH".to_string(),
                ..Default::default()
            },
            PartyScreeningRequest {
                name: "J. Doe".to_string(),
                ..Default::default()
            },
        ];
        let result = screener().screen_parties(&parties).unwrap();
        assert_eq!(result.status, ScreeningStatus::Blocked);
        assert!(screener().screen_parties(&[]).is_err());
    }

    #[test]
    fn test_ordinary_deposit_is_clear() {
        let result = screener()
            .screen_transaction(&deposit(dec!(1234.5), Some(dec!(1234.5))))
            .unwrap();
        assert_eq!(result.status, ScreeningStatus::Clear);
    }

    #[test]
    fn test_listed_source_address_blocks() {
        let mut request = deposit(dec!(50), Some(dec!(50)));
        request.source_address = Some(LISTED_WALLET.to_lowercase());

        let result = screener().screen_transaction(&request).unwrap();
        assert_eq!(result.decision(), RiskDecision::Reject);
    }

    #[test]
    fn test_large_round_deposit_from_risky_client_needs_review() {
        let mut request = deposit(dec!(20000), Some(dec!(20000)));
        request.client_high_risk = true;

        // 30 large + 10 round + 20 client risk
        let result = screener().screen_transaction(&request).unwrap();
        assert_eq!(result.risk_score, 60);
        assert_eq!(result.decision(), RiskDecision::Review);
        assert_eq!(result.reasons.len(), 3);
    }

    #[test]
    fn test_just_below_threshold_is_flagged() {
        let result = screener()
            .screen_transaction(&deposit(dec!(9500.25), Some(dec!(9500.25))))
            .unwrap();
        assert_eq!(result.status, ScreeningStatus::Flagged);
        assert_eq!(result.risk_score, 25);
    }

    #[test]
    fn test_unknown_value_is_flagged() {
        let result = screener()
            .screen_transaction(&deposit(dec!(0.5), None))
            .unwrap();
        assert_eq!(result.status, ScreeningStatus::Flagged);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        assert!(screener()
            .screen_transaction(&deposit(Decimal::ZERO, None))
            .is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let thresholds = ScreeningThresholds {
            auto_block: 40,
            manual_review: 60,
            ..ScreeningThresholds::default()
        };
        assert!(ComplianceScreener::new(create_test_engine(), thresholds).is_err());
    }
}
