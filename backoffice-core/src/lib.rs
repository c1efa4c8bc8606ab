//! Backoffice Core
//!
//! Domain model for client onboarding and the admin transaction pipeline.
//!
//! # Architecture
//!
//! - **Transition table**: transaction status changes are legal only along
//!   the edges listed in [`state::TRANSITIONS`]
//! - **Double entry**: every action posts balanced ledger entries
//! - **Step wizard**: KYC/KYB applications are validated one step at a time
//!
//! # Invariants
//!
//! - Per asset, Σ(debits) == Σ(credits) for every posting
//! - Terminal transactions never change status again
//! - A client application is submittable only once every step is valid

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod error;
pub mod ledger;
pub mod onboarding;
pub mod state;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use ledger::{EntrySide, LedgerEntry, Posting};
pub use onboarding::{Application, OnboardingStep, StepData};
pub use state::{TransactionAction, TransactionStatus};
pub use types::{
    AlertKind, AlertSeverity, AlertStatus, AmlAlert, Asset, Client, ClientKind, ClientStatus,
    PayoutDestination, RiskLevel, Transaction, Wallet, WalletStatus,
};
