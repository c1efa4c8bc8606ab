//! Error types for the domain model

use crate::state::{TransactionAction, TransactionStatus};
use thiserror::Error;

/// Result type for domain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Domain errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No edge in the transition table for this (status, action) pair
    #[error("Invalid transition: cannot {action} a transaction in status {from}")]
    InvalidTransition {
        /// Current status
        from: TransactionStatus,
        /// Requested action
        action: TransactionAction,
    },

    /// Posting does not balance for an asset
    #[error("Unbalanced posting for {asset}: debits {debits}, credits {credits}")]
    UnbalancedPosting {
        /// Asset code
        asset: String,
        /// Sum of debit amounts
        debits: String,
        /// Sum of credit amounts
        credits: String,
    },

    /// Amount is zero, negative or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Onboarding step rejected
    #[error("Invalid onboarding step {step}: {reason}")]
    InvalidStep {
        /// Step name
        step: String,
        /// Why it was rejected
        reason: String,
    },

    /// Unknown enum value read from storage or a request
    #[error("Unknown {kind}: {value}")]
    UnknownValue {
        /// Type being parsed
        kind: &'static str,
        /// Offending input
        value: String,
    },
}

impl Error {
    pub(crate) fn unknown(kind: &'static str, value: &str) -> Self {
        Error::UnknownValue {
            kind,
            value: value.to_string(),
        }
    }

    pub(crate) fn step(step: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidStep {
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}
