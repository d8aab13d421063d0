//! Read-only balance verification: replay a wallet's journal entries and
//! compare the result against the stored balance.

use payvault_core::{DomainError, DomainResult, Money};
use payvault_wallet::Wallet;

use crate::journal::{Transaction, TransactionId, TransactionKind};

/// Result of replaying a wallet's journal against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub wallet_id: payvault_wallet::WalletId,
    pub stored_balance: Money,
    /// Balance computed from the journal, in minor units. Kept as i128 so a
    /// corrupt journal cannot overflow the replay itself.
    pub replayed_minor: i128,
    pub outcome: ReconciliationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// Journal replay matches the stored balance exactly.
    Balanced,
    /// Stored balance and journal disagree. `delta_minor` is
    /// stored minus replayed; `suspect_entries` lists debits not tied to a
    /// purchase (fees, adjustments, withdrawals), the usual first place to
    /// look when investigating.
    Discrepancy {
        delta_minor: i128,
        suspect_entries: Vec<TransactionId>,
    },
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        matches!(self.outcome, ReconciliationOutcome::Balanced)
    }
}

/// Replay `entries` in chronological order and compare against the wallet's
/// stored balance. Never mutates anything.
///
/// Entries that do not reference the wallet contribute nothing; an entry in
/// a different currency is a hard error since the journal for a wallet must
/// be single-currency.
pub fn reconcile(wallet: &Wallet, entries: &[Transaction]) -> DomainResult<ReconciliationReport> {
    let wallet_id = wallet.id_typed();
    let currency = wallet.currency();

    let mut ordered: Vec<&Transaction> = entries.iter().filter(|e| e.touches(wallet_id)).collect();
    ordered.sort_by_key(|e| (e.created_at(), e.id()));

    let mut replayed: i128 = 0;
    for entry in &ordered {
        if entry.amount().currency() != currency {
            return Err(DomainError::CurrencyMismatch {
                expected: currency,
                actual: entry.amount().currency(),
            });
        }
        replayed += i128::from(entry.signed_minor_for(wallet_id));
    }

    let stored = i128::from(wallet.balance().minor());
    let outcome = if stored == replayed {
        ReconciliationOutcome::Balanced
    } else {
        let suspect_entries = ordered
            .iter()
            .filter(|e| {
                e.signed_minor_for(wallet_id) < 0
                    && e.kind() != TransactionKind::Transfer
                    && e.related().entity_type != "purchase"
            })
            .map(|e| e.id())
            .collect();
        ReconciliationOutcome::Discrepancy {
            delta_minor: stored - replayed,
            suspect_entries,
        }
    };

    Ok(ReconciliationReport {
        wallet_id,
        stored_balance: wallet.balance(),
        replayed_minor: replayed,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{EntityRef, IdempotencyKey};
    use chrono::{Duration, Utc};
    use payvault_core::{AggregateId, Currency, UserId};
    use payvault_wallet::WalletId;
    use proptest::prelude::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn money(s: &str) -> Money {
        Money::parse(s, usd()).unwrap()
    }

    fn wallet_with_balance(s: &str) -> Wallet {
        let now = Utc::now();
        let mut w = Wallet::open(WalletId::new(AggregateId::new()), UserId::new(), usd(), now);
        if s != "0" {
            w.credit(money(s), now).unwrap();
        }
        w
    }

    fn credit_entry(dest: WalletId, amount: &str, seq: i64) -> Transaction {
        Transaction::credit(
            TransactionId::new(AggregateId::new()),
            dest,
            money(amount),
            EntityRef::new("recharge", format!("r-{seq}")),
            IdempotencyKey::derive("recharge", &format!("r-{seq}"), "credit"),
            Utc::now() + Duration::seconds(seq),
        )
        .unwrap()
    }

    fn debit_entry(source: WalletId, amount: &str, entity_type: &str, seq: i64) -> Transaction {
        Transaction::debit(
            TransactionId::new(AggregateId::new()),
            source,
            money(amount),
            EntityRef::new(entity_type, format!("e-{seq}")),
            IdempotencyKey::derive(entity_type, &format!("e-{seq}"), "debit"),
            Utc::now() + Duration::seconds(seq),
        )
        .unwrap()
    }

    #[test]
    fn matching_journal_reports_balanced() {
        let wallet = wallet_with_balance("70");
        let id = wallet.id_typed();
        let entries = vec![
            credit_entry(id, "100", 1),
            debit_entry(id, "30", "purchase", 2),
        ];
        let report = reconcile(&wallet, &entries).unwrap();
        assert!(report.is_balanced());
        assert_eq!(report.replayed_minor, 700_000);
    }

    #[test]
    fn discrepancy_reports_delta_and_suspects() {
        let wallet = wallet_with_balance("80");
        let id = wallet.id_typed();
        let fee = debit_entry(id, "10", "fee", 3);
        let fee_id = fee.id();
        let entries = vec![
            credit_entry(id, "100", 1),
            debit_entry(id, "30", "purchase", 2),
            fee,
        ];
        // stored 80.0000, replayed 60.0000
        let report = reconcile(&wallet, &entries).unwrap();
        match report.outcome {
            ReconciliationOutcome::Discrepancy {
                delta_minor,
                suspect_entries,
            } => {
                assert_eq!(delta_minor, 200_000);
                assert_eq!(suspect_entries, vec![fee_id]);
            }
            other => panic!("expected discrepancy, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_entries_are_ignored() {
        let wallet = wallet_with_balance("0");
        let other = WalletId::new(AggregateId::new());
        let entries = vec![credit_entry(other, "100", 1)];
        let report = reconcile(&wallet, &entries).unwrap();
        assert!(report.is_balanced());
        assert_eq!(report.replayed_minor, 0);
    }

    #[test]
    fn foreign_currency_entry_is_an_error() {
        let wallet = wallet_with_balance("10");
        let id = wallet.id_typed();
        let eur = Currency::new("EUR").unwrap();
        let entry = Transaction::credit(
            TransactionId::new(AggregateId::new()),
            id,
            Money::parse("10", eur).unwrap(),
            EntityRef::new("recharge", "r-1"),
            IdempotencyKey::derive("recharge", "r-1", "credit"),
            Utc::now(),
        )
        .unwrap();
        let err = reconcile(&wallet, &[entry]).unwrap_err();
        assert!(matches!(err, DomainError::CurrencyMismatch { .. }));
    }

    proptest! {
        // Replaying the journal produced by a sequence of credits always
        // matches the wallet balance that absorbed the same credits.
        #[test]
        fn replay_matches_applied_credits(amounts in proptest::collection::vec(1i64..1_000_000, 1..20)) {
            let now = Utc::now();
            let mut wallet = Wallet::open(WalletId::new(AggregateId::new()), UserId::new(), usd(), now);
            let id = wallet.id_typed();
            let mut entries = Vec::new();
            for (seq, minor) in amounts.iter().enumerate() {
                let amount = Money::from_minor(*minor, usd());
                wallet.credit(amount, now).unwrap();
                entries.push(Transaction::credit(
                    TransactionId::new(AggregateId::new()),
                    id,
                    amount,
                    EntityRef::new("recharge", format!("r-{seq}")),
                    IdempotencyKey::derive("recharge", &format!("r-{seq}"), "credit"),
                    now + Duration::seconds(seq as i64),
                ).unwrap());
            }
            let report = reconcile(&wallet, &entries).unwrap();
            prop_assert!(report.is_balanced());
        }
    }
}
