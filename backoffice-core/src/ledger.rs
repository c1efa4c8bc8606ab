//! Double-entry ledger postings
//!
//! Each committed action writes one [`Posting`]: a set of entries that
//! balances per asset. Account names are plain strings built by the
//! functions in [`accounts`].

use crate::error::{Error, Result};
use crate::state::TransactionAction;
use crate::types::{Asset, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ledger account naming
pub mod accounts {
    use crate::types::Asset;
    use uuid::Uuid;

    /// Platform holdings at the custody provider
    pub fn custody(asset: Asset) -> String {
        format!("custody:{}", asset)
    }

    /// What the platform owes a client
    pub fn client(client_id: Uuid, asset: Asset) -> String {
        format!("client:{}:{}", client_id, asset)
    }

    /// Platform fiat operating account
    pub fn omnibus(asset: Asset) -> String {
        format!("omnibus:{}", asset)
    }

    /// Payouts dispatched but not yet settled
    pub fn payout_clearing(asset: Asset) -> String {
        format!("payout_clearing:{}", asset)
    }

    /// Platform fee income
    pub fn fees(asset: Asset) -> String {
        format!("revenue:fees:{}", asset)
    }

    /// Prefix shared by all of a client's accounts
    pub fn client_prefix(client_id: Uuid) -> String {
        format!("client:{}:", client_id)
    }
}

/// Debit or credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySide {
    /// Debit
    Debit,
    /// Credit
    Credit,
}

impl EntrySide {
    /// Column value
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "DEBIT",
            EntrySide::Credit => "CREDIT",
        }
    }

    fn opposite(&self) -> Self {
        match self {
            EntrySide::Debit => EntrySide::Credit,
            EntrySide::Credit => EntrySide::Debit,
        }
    }
}

impl fmt::Display for EntrySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntrySide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DEBIT" => Ok(EntrySide::Debit),
            "CREDIT" => Ok(EntrySide::Credit),
            _ => Err(Error::unknown("entry side", s)),
        }
    }
}

/// One line of a posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID
    pub id: Uuid,
    /// Transaction the posting belongs to
    pub transaction_id: Uuid,
    /// Action that produced it
    pub action: TransactionAction,
    /// Account name
    pub account: String,
    /// Asset
    pub asset: Asset,
    /// Debit or credit
    pub side: EntrySide,
    /// Always positive
    pub amount: Decimal,
    /// Entry this one compensates
    pub reverses: Option<Uuid>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Debits count positive, credits negative
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            EntrySide::Debit => self.amount,
            EntrySide::Credit => -self.amount,
        }
    }
}

/// Entries for one (transaction, action), checked on build
#[derive(Debug, Clone)]
pub struct Posting {
    transaction_id: Uuid,
    action: TransactionAction,
    entries: Vec<LedgerEntry>,
}

impl Posting {
    /// Empty posting
    pub fn new(transaction_id: Uuid, action: TransactionAction) -> Self {
        Self {
            transaction_id,
            action,
            entries: Vec::new(),
        }
    }

    /// Add a debit/credit pair moving `amount` of `asset`
    pub fn transfer(
        mut self,
        debit_account: impl Into<String>,
        credit_account: impl Into<String>,
        asset: Asset,
        amount: Decimal,
    ) -> Self {
        self.push(debit_account.into(), asset, EntrySide::Debit, amount, None);
        self.push(credit_account.into(), asset, EntrySide::Credit, amount, None);
        self
    }

    fn push(
        &mut self,
        account: String,
        asset: Asset,
        side: EntrySide,
        amount: Decimal,
        reverses: Option<Uuid>,
    ) {
        self.entries.push(LedgerEntry {
            id: Uuid::now_v7(),
            transaction_id: self.transaction_id,
            action: self.action,
            account,
            asset,
            side,
            amount,
            reverses,
            created_at: Utc::now(),
        });
    }

    /// Validate and return the entries
    pub fn build(self) -> Result<Vec<LedgerEntry>> {
        if let Some(entry) = self.entries.iter().find(|e| e.amount <= Decimal::ZERO) {
            return Err(Error::InvalidAmount(format!(
                "{} {} on {} must be positive",
                entry.amount, entry.asset, entry.account
            )));
        }
        verify_balanced(&self.entries)?;
        Ok(self.entries)
    }
}

/// Standard posting for `action` on `tx`, read after the action's field
/// updates have been applied to `tx`.
pub fn posting_for(tx: &Transaction, action: TransactionAction) -> Result<Vec<LedgerEntry>> {
    let client = tx.client_id;
    let crypto = tx.source_asset;
    let fiat = tx.target_currency;
    let posting = Posting::new(tx.id, action);

    let posting = match action {
        TransactionAction::MarkReceived => posting.transfer(
            accounts::custody(crypto),
            accounts::client(client, crypto),
            crypto,
            tx.source_amount,
        ),
        TransactionAction::ExecuteSwap => {
            let target = tx
                .target_amount
                .ok_or_else(|| Error::InvalidAmount("swap has no target amount".to_string()))?;
            let fee = tx.fee_amount.unwrap_or(Decimal::ZERO);

            let posting = posting
                .transfer(
                    accounts::client(client, crypto),
                    accounts::custody(crypto),
                    crypto,
                    tx.source_amount,
                )
                .transfer(
                    accounts::omnibus(fiat),
                    accounts::client(client, fiat),
                    fiat,
                    target,
                );

            if fee > Decimal::ZERO {
                posting.transfer(accounts::client(client, fiat), accounts::fees(fiat), fiat, fee)
            } else {
                posting
            }
        }
        TransactionAction::SendPayout => posting.transfer(
            accounts::client(client, fiat),
            accounts::payout_clearing(fiat),
            fiat,
            net_payout(tx)?,
        ),
        TransactionAction::MarkComplete => posting.transfer(
            accounts::payout_clearing(fiat),
            accounts::omnibus(fiat),
            fiat,
            net_payout(tx)?,
        ),
        // Reversals, if any, come from `reverse`
        TransactionAction::MarkFailed => posting,
    };

    posting.build()
}

fn net_payout(tx: &Transaction) -> Result<Decimal> {
    tx.net_payout()
        .ok_or_else(|| Error::InvalidAmount("payout before swap".to_string()))
}

/// Compensating entries for `entries`, attributed to `action`
pub fn reverse(entries: &[LedgerEntry], action: TransactionAction) -> Result<Vec<LedgerEntry>> {
    let Some(first) = entries.first() else {
        return Ok(Vec::new());
    };

    let mut posting = Posting::new(first.transaction_id, action);
    for entry in entries {
        posting.push(
            entry.account.clone(),
            entry.asset,
            entry.side.opposite(),
            entry.amount,
            Some(entry.id),
        );
    }
    posting.build()
}

/// Signed balance per (account, asset)
pub fn balances(entries: &[LedgerEntry]) -> BTreeMap<(String, Asset), Decimal> {
    let mut totals = BTreeMap::new();
    for entry in entries {
        *totals
            .entry((entry.account.clone(), entry.asset))
            .or_insert(Decimal::ZERO) += entry.signed_amount();
    }
    totals
}

/// Σ debits == Σ credits for every asset
pub fn verify_balanced(entries: &[LedgerEntry]) -> Result<()> {
    let mut per_asset: BTreeMap<Asset, (Decimal, Decimal)> = BTreeMap::new();
    for entry in entries {
        let totals = per_asset.entry(entry.asset).or_default();
        match entry.side {
            EntrySide::Debit => totals.0 += entry.amount,
            EntrySide::Credit => totals.1 += entry.amount,
        }
    }

    for (asset, (debits, credits)) in per_asset {
        if debits != credits {
            return Err(Error::UnbalancedPosting {
                asset: asset.to_string(),
                debits: debits.to_string(),
                credits: credits.to_string(),
            });
        }
    }
    Ok(())
}
