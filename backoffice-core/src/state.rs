//! Transaction status state machine
//!
//! Legal status changes are listed in one table. Handlers never branch on
//! status themselves; they ask [`transition`] for the target.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created, waiting for the client's crypto deposit
    Pending,
    /// Deposit seen in custody and screened
    DepositReceived,
    /// Crypto exchanged for fiat
    SwapCompleted,
    /// Bank payout dispatched
    PayoutInProgress,
    /// Bank payout settled (terminal)
    PayoutCompleted,
    /// Rejected or abandoned (terminal)
    Failed,
}

impl TransactionStatus {
    /// All statuses, in pipeline order
    pub const ALL: [TransactionStatus; 6] = [
        TransactionStatus::Pending,
        TransactionStatus::DepositReceived,
        TransactionStatus::SwapCompleted,
        TransactionStatus::PayoutInProgress,
        TransactionStatus::PayoutCompleted,
        TransactionStatus::Failed,
    ];

    /// Column value
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::DepositReceived => "DEPOSIT_RECEIVED",
            TransactionStatus::SwapCompleted => "SWAP_COMPLETED",
            TransactionStatus::PayoutInProgress => "PAYOUT_IN_PROGRESS",
            TransactionStatus::PayoutCompleted => "PAYOUT_COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    /// No action may leave a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::PayoutCompleted | TransactionStatus::Failed
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::unknown("transaction status", s))
    }
}

/// Admin-invoked action on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionAction {
    /// Confirm the crypto deposit arrived; runs KYT screening
    MarkReceived,
    /// Exchange the deposit for fiat at the swap provider
    ExecuteSwap,
    /// Dispatch the fiat payout to the client's bank account
    SendPayout,
    /// Confirm the payout settled
    MarkComplete,
    /// Abandon the transaction
    MarkFailed,
}

impl TransactionAction {
    /// All actions
    pub const ALL: [TransactionAction; 5] = [
        TransactionAction::MarkReceived,
        TransactionAction::ExecuteSwap,
        TransactionAction::SendPayout,
        TransactionAction::MarkComplete,
        TransactionAction::MarkFailed,
    ];

    /// Wire/column value
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionAction::MarkReceived => "mark_received",
            TransactionAction::ExecuteSwap => "execute_swap",
            TransactionAction::SendPayout => "send_payout",
            TransactionAction::MarkComplete => "mark_complete",
            TransactionAction::MarkFailed => "mark_failed",
        }
    }
}

impl fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TransactionAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::unknown("transaction action", s))
    }
}

/// Forward edges of the pipeline. `MarkFailed` is handled separately since
/// it applies to every non-terminal status.
pub const TRANSITIONS: &[(TransactionStatus, TransactionAction, TransactionStatus)] = &[
    (
        TransactionStatus::Pending,
        TransactionAction::MarkReceived,
        TransactionStatus::DepositReceived,
    ),
    (
        TransactionStatus::DepositReceived,
        TransactionAction::ExecuteSwap,
        TransactionStatus::SwapCompleted,
    ),
    (
        TransactionStatus::SwapCompleted,
        TransactionAction::SendPayout,
        TransactionStatus::PayoutInProgress,
    ),
    (
        TransactionStatus::PayoutInProgress,
        TransactionAction::MarkComplete,
        TransactionStatus::PayoutCompleted,
    ),
];

/// Target status for `action` applied in status `from`
pub fn transition(from: TransactionStatus, action: TransactionAction) -> Result<TransactionStatus> {
    if from.is_terminal() {
        return Err(Error::InvalidTransition { from, action });
    }

    if action == TransactionAction::MarkFailed {
        return Ok(TransactionStatus::Failed);
    }

    TRANSITIONS
        .iter()
        .find(|(state, edge, _)| *state == from && *edge == action)
        .map(|(_, _, to)| *to)
        .ok_or(Error::InvalidTransition { from, action })
}

/// Actions that have an edge out of `status`
pub fn allowed_actions(status: TransactionStatus) -> Vec<TransactionAction> {
    TransactionAction::ALL
        .into_iter()
        .filter(|action| transition(status, *action).is_ok())
        .collect()
}
