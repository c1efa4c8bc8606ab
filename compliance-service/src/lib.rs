pub mod address;
pub mod error;
pub mod sanctions;
pub mod screening;
pub mod types;

pub use error::{ComplianceError, Result};
pub use sanctions::SanctionsEngine;
pub use screening::{ComplianceScreener, ScreeningThresholds};
pub use types::{
    PartyScreeningRequest, RiskDecision, SanctionsEntry, SanctionsList, ScreeningResult,
    ScreeningStatus, TransactionScreeningRequest,
};
