//! Property-based tests for ledger and state machine invariants
//!
//! - Balance: every built posting nets to zero per asset
//! - Reversal: a posting plus its reversal leaves every account at zero
//! - Terminality: no action sequence escapes PAYOUT_COMPLETED or FAILED

use backoffice_core::{
    ledger::{self, accounts, Posting},
    state::{self, TransactionAction, TransactionStatus},
    types::{Asset, PayoutDestination, Transaction},
};
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Strategy for generating valid amounts (positive decimals)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..100_000_000u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

fn asset_strategy() -> impl Strategy<Value = Asset> {
    prop_oneof![
        Just(Asset::USDT),
        Just(Asset::USDC),
        Just(Asset::BTC),
        Just(Asset::EUR),
        Just(Asset::GBP),
    ]
}

fn action_strategy() -> impl Strategy<Value = TransactionAction> {
    prop_oneof![
        Just(TransactionAction::MarkReceived),
        Just(TransactionAction::ExecuteSwap),
        Just(TransactionAction::SendPayout),
        Just(TransactionAction::MarkComplete),
        Just(TransactionAction::MarkFailed),
    ]
}

fn transfer_strategy() -> impl Strategy<Value = (String, String, Asset, Decimal)> {
    (
        "[a-z]{3,8}",
        "[a-z]{3,8}",
        asset_strategy(),
        amount_strategy(),
    )
}

fn transaction(source: Decimal, target: Decimal, fee: Decimal) -> Transaction {
    Transaction {
        id: Uuid::now_v7(),
        client_id: Uuid::now_v7(),
        wallet_id: Uuid::now_v7(),
        source_asset: Asset::USDC,
        source_amount: source,
        target_currency: Asset::EUR,
        target_amount: Some(target),
        fx_rate: None,
        fee_amount: Some(fee),
        payout_destination: PayoutDestination {
            holder_name: "Prop Test".to_string(),
            iban: "NL91ABNA0417164300".to_string(),
            bic: None,
        },
        deposit_tx_hash: None,
        swap_reference: None,
        payout_reference: None,
        status: TransactionStatus::Pending,
        failure_reason: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn per_asset_totals(entries: &[ledger::LedgerEntry]) -> BTreeMap<Asset, Decimal> {
    let mut totals = BTreeMap::new();
    for entry in entries {
        *totals.entry(entry.asset).or_insert(Decimal::ZERO) += entry.signed_amount();
    }
    totals
}

proptest! {
    #[test]
    fn prop_built_postings_balance(transfers in prop::collection::vec(transfer_strategy(), 1..20)) {
        let mut posting = Posting::new(Uuid::now_v7(), TransactionAction::ExecuteSwap);
        for (debit, credit, asset, amount) in &transfers {
            posting = posting.transfer(debit.clone(), credit.clone(), *asset, *amount);
        }

        let entries = posting.build().unwrap();
        prop_assert_eq!(entries.len(), transfers.len() * 2);
        for total in per_asset_totals(&entries).values() {
            prop_assert!(total.is_zero());
        }
    }

    #[test]
    fn prop_reversal_restores_every_account(transfers in prop::collection::vec(transfer_strategy(), 1..10)) {
        let mut posting = Posting::new(Uuid::now_v7(), TransactionAction::SendPayout);
        for (debit, credit, asset, amount) in &transfers {
            posting = posting.transfer(debit.clone(), credit.clone(), *asset, *amount);
        }
        let mut entries = posting.build().unwrap();
        let reversal = ledger::reverse(&entries, TransactionAction::MarkFailed).unwrap();
        entries.extend(reversal);

        for balance in ledger::balances(&entries).values() {
            prop_assert!(balance.is_zero());
        }
    }

    #[test]
    fn prop_full_pipeline_leaves_client_at_zero(
        source in amount_strategy(),
        target in amount_strategy(),
        fee_bps in 0u32..500,
    ) {
        let fee = Asset::EUR.round(target * Decimal::from(fee_bps) / Decimal::from(10_000));
        let tx = transaction(source, target, fee);

        let mut entries = Vec::new();
        for action in [
            TransactionAction::MarkReceived,
            TransactionAction::ExecuteSwap,
            TransactionAction::SendPayout,
            TransactionAction::MarkComplete,
        ] {
            entries.extend(ledger::posting_for(&tx, action).unwrap());
        }

        let balances = ledger::balances(&entries);
        let client_crypto = (accounts::client(tx.client_id, Asset::USDC), Asset::USDC);
        let client_fiat = (accounts::client(tx.client_id, Asset::EUR), Asset::EUR);
        prop_assert!(balances[&client_crypto].is_zero());
        prop_assert!(balances.get(&client_fiat).map_or(true, |b| b.is_zero()));
        if fee > Decimal::ZERO {
            prop_assert_eq!(balances[&(accounts::fees(Asset::EUR), Asset::EUR)], -fee);
        }
    }

    #[test]
    fn prop_terminal_states_are_absorbing(actions in prop::collection::vec(action_strategy(), 0..30)) {
        let mut status = TransactionStatus::Pending;
        for action in actions {
            match state::transition(status, action) {
                Ok(next) => {
                    prop_assert!(!status.is_terminal());
                    status = next;
                }
                Err(_) => prop_assert!(
                    status.is_terminal() || !state::allowed_actions(status).contains(&action)
                ),
            }
        }
    }
}
