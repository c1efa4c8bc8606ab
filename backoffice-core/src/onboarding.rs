//! KYC/KYB onboarding wizard
//!
//! The client-facing wizard posts one step at a time. Each step is validated
//! on arrival; an application is complete when every step for its client
//! kind has been accepted.

use crate::error::{Error, Result};
use crate::types::ClientKind;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum age for an individual applicant
pub const MINIMUM_AGE: i32 = 18;

/// Ownership share above which an owner counts as a UBO
pub const UBO_THRESHOLD_PERCENT: u32 = 25;

/// Wizard step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    /// Name, date of birth, nationality
    PersonalInfo,
    /// Residential or registered address
    Address,
    /// Passport or ID card
    IdentityDocument,
    /// Legal entity details
    CompanyInfo,
    /// Ultimate beneficial owners
    BeneficialOwners,
    /// Incorporation certificate and proof of address
    CompanyDocuments,
}

impl OnboardingStep {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStep::PersonalInfo => "personal_info",
            OnboardingStep::Address => "address",
            OnboardingStep::IdentityDocument => "identity_document",
            OnboardingStep::CompanyInfo => "company_info",
            OnboardingStep::BeneficialOwners => "beneficial_owners",
            OnboardingStep::CompanyDocuments => "company_documents",
        }
    }
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const INDIVIDUAL_STEPS: &[OnboardingStep] = &[
    OnboardingStep::PersonalInfo,
    OnboardingStep::Address,
    OnboardingStep::IdentityDocument,
];

const BUSINESS_STEPS: &[OnboardingStep] = &[
    OnboardingStep::CompanyInfo,
    OnboardingStep::Address,
    OnboardingStep::BeneficialOwners,
    OnboardingStep::CompanyDocuments,
];

/// Step sequence for a client kind
pub fn steps_for(kind: ClientKind) -> &'static [OnboardingStep] {
    match kind {
        ClientKind::Individual => INDIVIDUAL_STEPS,
        ClientKind::Business => BUSINESS_STEPS,
    }
}

/// Personal details of an individual applicant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub nationality: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    NationalId,
    DrivingLicence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDocument {
    pub document_type: DocumentType,
    pub document_number: String,
    pub issuing_country: String,
    pub expiry_date: NaiveDate,
}

/// Legal entity details of a business applicant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub legal_name: String,
    pub registration_number: String,
    pub incorporation_country: String,
    pub incorporation_date: NaiveDate,
    pub business_activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficialOwner {
    pub full_name: String,
    pub nationality: String,
    pub ownership_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficialOwners {
    pub owners: Vec<BeneficialOwner>,
}

/// References to uploaded documents (storage object keys)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyDocuments {
    pub certificate_of_incorporation: String,
    pub proof_of_address: String,
    #[serde(default)]
    pub articles_of_association: Option<String>,
}

/// Payload of one wizard step, tagged by `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepData {
    PersonalInfo(PersonalInfo),
    Address(AddressInfo),
    IdentityDocument(IdentityDocument),
    CompanyInfo(CompanyInfo),
    BeneficialOwners(BeneficialOwners),
    CompanyDocuments(CompanyDocuments),
}

impl StepData {
    /// Which step this payload fills
    pub fn step(&self) -> OnboardingStep {
        match self {
            StepData::PersonalInfo(_) => OnboardingStep::PersonalInfo,
            StepData::Address(_) => OnboardingStep::Address,
            StepData::IdentityDocument(_) => OnboardingStep::IdentityDocument,
            StepData::CompanyInfo(_) => OnboardingStep::CompanyInfo,
            StepData::BeneficialOwners(_) => OnboardingStep::BeneficialOwners,
            StepData::CompanyDocuments(_) => OnboardingStep::CompanyDocuments,
        }
    }

    /// Field-level validation, dates checked against `today`
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        let step = self.step();
        match self {
            StepData::PersonalInfo(info) => {
                required(step, "first_name", &info.first_name)?;
                required(step, "last_name", &info.last_name)?;
                country_code(step, "nationality", &info.nationality)?;
                if info.date_of_birth > today {
                    return Err(Error::step(step, "date_of_birth is in the future"));
                }
                if age_on(info.date_of_birth, today) < MINIMUM_AGE {
                    return Err(Error::step(
                        step,
                        format!("applicant must be at least {} years old", MINIMUM_AGE),
                    ));
                }
            }
            StepData::Address(address) => {
                required(step, "line1", &address.line1)?;
                required(step, "city", &address.city)?;
                required(step, "postal_code", &address.postal_code)?;
                country_code(step, "country", &address.country)?;
            }
            StepData::IdentityDocument(document) => {
                required(step, "document_number", &document.document_number)?;
                country_code(step, "issuing_country", &document.issuing_country)?;
                if document.expiry_date <= today {
                    return Err(Error::step(step, "document has expired"));
                }
            }
            StepData::CompanyInfo(company) => {
                required(step, "legal_name", &company.legal_name)?;
                required(step, "registration_number", &company.registration_number)?;
                required(step, "business_activity", &company.business_activity)?;
                country_code(step, "incorporation_country", &company.incorporation_country)?;
                if company.incorporation_date > today {
                    return Err(Error::step(step, "incorporation_date is in the future"));
                }
            }
            StepData::BeneficialOwners(ubo) => validate_owners(&ubo.owners)?,
            StepData::CompanyDocuments(documents) => {
                required(
                    step,
                    "certificate_of_incorporation",
                    &documents.certificate_of_incorporation,
                )?;
                required(step, "proof_of_address", &documents.proof_of_address)?;
            }
        }
        Ok(())
    }
}

fn required(step: OnboardingStep, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::step(step, format!("{} is required", field)));
    }
    Ok(())
}

fn country_code(step: OnboardingStep, field: &str, value: &str) -> Result<()> {
    if value.len() != 2 || !value.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(Error::step(
            step,
            format!("{} must be an ISO 3166 alpha-2 code", field),
        ));
    }
    Ok(())
}

fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}

fn validate_owners(owners: &[BeneficialOwner]) -> Result<()> {
    let step = OnboardingStep::BeneficialOwners;
    if owners.is_empty() {
        return Err(Error::step(step, "at least one beneficial owner is required"));
    }

    let hundred = Decimal::from(100);
    let mut total = Decimal::ZERO;
    for owner in owners {
        required(step, "full_name", &owner.full_name)?;
        country_code(step, "nationality", &owner.nationality)?;
        if owner.ownership_percent <= Decimal::ZERO || owner.ownership_percent > hundred {
            return Err(Error::step(
                step,
                format!("ownership of {} must be in (0, 100]", owner.full_name),
            ));
        }
        total += owner.ownership_percent;
    }

    if total > hundred {
        return Err(Error::step(step, format!("ownership totals {}%", total)));
    }

    let threshold = Decimal::from(UBO_THRESHOLD_PERCENT);
    if !owners.iter().any(|o| o.ownership_percent >= threshold) {
        return Err(Error::step(
            step,
            format!("no owner holds at least {}%", UBO_THRESHOLD_PERCENT),
        ));
    }
    Ok(())
}

/// Accepted wizard steps for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub kind: ClientKind,
    /// Accepted steps, in wizard order
    pub steps: Vec<StepData>,
}

impl Application {
    /// Empty application
    pub fn new(kind: ClientKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
        }
    }

    /// Validate and store a step, replacing an earlier submission of it
    pub fn submit_step(&mut self, data: StepData, today: NaiveDate) -> Result<()> {
        let sequence = steps_for(self.kind);
        let step = data.step();
        if !sequence.contains(&step) {
            return Err(Error::step(
                step,
                format!("not part of {} onboarding", self.kind),
            ));
        }

        data.validate(today)?;

        self.steps.retain(|existing| existing.step() != step);
        self.steps.push(data);
        self.steps.sort_by_key(|existing| {
            sequence
                .iter()
                .position(|s| *s == existing.step())
                .unwrap_or(usize::MAX)
        });
        Ok(())
    }

    /// Step payload, if accepted
    pub fn get(&self, step: OnboardingStep) -> Option<&StepData> {
        self.steps.iter().find(|data| data.step() == step)
    }

    /// First step of the sequence not yet accepted
    pub fn next_step(&self) -> Option<OnboardingStep> {
        steps_for(self.kind)
            .iter()
            .copied()
            .find(|step| self.get(*step).is_none())
    }

    /// Every step accepted
    pub fn is_complete(&self) -> bool {
        self.next_step().is_none()
    }

    /// (accepted, total)
    pub fn progress(&self) -> (usize, usize) {
        let sequence = steps_for(self.kind);
        let done = sequence.iter().filter(|s| self.get(**s).is_some()).count();
        (done, sequence.len())
    }

    /// Names to run through sanctions screening
    pub fn screened_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for data in &self.steps {
            match data {
                StepData::PersonalInfo(info) => {
                    names.push(format!("{} {}", info.first_name.trim(), info.last_name.trim()))
                }
                StepData::CompanyInfo(company) => names.push(company.legal_name.trim().to_string()),
                StepData::BeneficialOwners(ubo) => names.extend(
                    ubo.owners
                        .iter()
                        .map(|owner| owner.full_name.trim().to_string()),
                ),
                _ => {}
            }
        }
        names
    }

    /// Distinct countries the applicant is tied to: nationality, residence,
    /// document issuer, incorporation and owner nationalities
    pub fn screened_countries(&self) -> Vec<String> {
        let mut countries = Vec::new();
        for data in &self.steps {
            match data {
                StepData::PersonalInfo(info) => countries.push(info.nationality.clone()),
                StepData::Address(address) => countries.push(address.country.clone()),
                StepData::IdentityDocument(doc) => countries.push(doc.issuing_country.clone()),
                StepData::CompanyInfo(company) => {
                    countries.push(company.incorporation_country.clone())
                }
                StepData::BeneficialOwners(ubo) => {
                    countries.extend(ubo.owners.iter().map(|owner| owner.nationality.clone()))
                }
                StepData::CompanyDocuments(_) => {}
            }
        }
        countries.sort();
        countries.dedup();
        countries
    }

    /// Identifiers to run through sanctions screening
    pub fn screened_identifiers(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|data| match data {
                StepData::IdentityDocument(doc) => Some(doc.document_number.clone()),
                StepData::CompanyInfo(company) => Some(company.registration_number.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
    }

    fn personal_info(dob: NaiveDate) -> StepData {
        StepData::PersonalInfo(PersonalInfo {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            date_of_birth: dob,
            nationality: "GB".to_string(),
            phone: None,
        })
    }

    fn owner(name: &str, percent: Decimal) -> BeneficialOwner {
        BeneficialOwner {
            full_name: name.to_string(),
            nationality: "DE".to_string(),
            ownership_percent: percent,
        }
    }

    #[test]
    fn test_individual_wizard_completes() {
        let mut app = Application::new(ClientKind::Individual);
        assert_eq!(app.next_step(), Some(OnboardingStep::PersonalInfo));

        app.submit_step(personal_info(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()), today())
            .unwrap();
        app.submit_step(
            StepData::Address(AddressInfo {
                line1: "1 Main St".to_string(),
                line2: None,
                city: "London".to_string(),
                postal_code: "N1 9GU".to_string(),
                country: "GB".to_string(),
            }),
            today(),
        )
        .unwrap();
        assert_eq!(app.progress(), (2, 3));

        app.submit_step(
            StepData::IdentityDocument(IdentityDocument {
                document_type: DocumentType::Passport,
                document_number: "123456789".to_string(),
                issuing_country: "GB".to_string(),
                expiry_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            }),
            today(),
        )
        .unwrap();

        assert!(app.is_complete());
        assert_eq!(app.screened_names(), vec!["Ada Lovelace".to_string()]);
        assert_eq!(app.screened_identifiers(), vec!["123456789".to_string()]);
        assert_eq!(app.screened_countries(), vec!["GB".to_string()]);
    }

    #[test]
    fn test_minor_rejected_on_birthday_eve() {
        let mut app = Application::new(ClientKind::Individual);
        let eve = NaiveDate::from_ymd_opt(2008, 10, 18).unwrap();
        assert!(app.submit_step(personal_info(eve), today()).is_err());

        let birthday = NaiveDate::from_ymd_opt(2008, 10, 17).unwrap();
        assert!(app.submit_step(personal_info(birthday), today()).is_ok());
    }

    #[test]
    fn test_step_outside_sequence_rejected() {
        let mut app = Application::new(ClientKind::Business);
        let err = app
            .submit_step(personal_info(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()), today())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStep { .. }));
    }

    #[test]
    fn test_resubmission_replaces_step() {
        let mut app = Application::new(ClientKind::Individual);
        app.submit_step(personal_info(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()), today())
            .unwrap();
        app.submit_step(personal_info(NaiveDate::from_ymd_opt(1985, 5, 5).unwrap()), today())
            .unwrap();
        assert_eq!(app.steps.len(), 1);
    }

    #[test]
    fn test_expired_document_rejected() {
        let doc = StepData::IdentityDocument(IdentityDocument {
            document_type: DocumentType::NationalId,
            document_number: "X1".to_string(),
            issuing_country: "FR".to_string(),
            expiry_date: today(),
        });
        assert!(doc.validate(today()).is_err());
    }

    #[test]
    fn test_bad_country_code_rejected() {
        let address = StepData::Address(AddressInfo {
            line1: "1 Rue".to_string(),
            line2: None,
            city: "Paris".to_string(),
            postal_code: "75001".to_string(),
            country: "fra".to_string(),
        });
        assert!(address.validate(today()).is_err());
    }

    #[test]
    fn test_beneficial_owner_rules() {
        let ok = StepData::BeneficialOwners(BeneficialOwners {
            owners: vec![owner("Jan Novak", dec!(60)), owner("Eva Novak", dec!(40))],
        });
        assert!(ok.validate(today()).is_ok());

        let over = StepData::BeneficialOwners(BeneficialOwners {
            owners: vec![owner("Jan Novak", dec!(60)), owner("Eva Novak", dec!(41))],
        });
        assert!(over.validate(today()).is_err());

        let no_ubo = StepData::BeneficialOwners(BeneficialOwners {
            owners: vec![owner("A", dec!(20)), owner("B", dec!(20))],
        });
        assert!(no_ubo.validate(today()).is_err());

        let empty = StepData::BeneficialOwners(BeneficialOwners { owners: vec![] });
        assert!(empty.validate(today()).is_err());
    }

    #[test]
    fn test_step_payload_wire_format() {
        let json = r#"{"step":"company_documents","certificate_of_incorporation":"doc/1","proof_of_address":"doc/2"}"#;
        let data: StepData = serde_json::from_str(json).unwrap();
        assert_eq!(data.step(), OnboardingStep::CompanyDocuments);
    }
}
