//! Withdrawal workflow orchestration: request, review, and completion.
//!
//! Funds leave the wallet only at completion. The completion posting is
//! keyed by the withdrawal's identity, so two racing completions collide on
//! the journal's unique key and the loser resolves by re-reading the
//! completed record instead of debiting again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use payvault_core::{
    AggregateId, AggregateRoot, DomainError, ExpectedVersion, Money, UserId,
};
use payvault_infra::{LedgerCommit, LedgerStore, StoreError};
use payvault_ledger::{EntityRef, Transaction, TransactionId};
use payvault_wallet::{Wallet, WalletId};
use payvault_withdrawals::{Withdrawal, WithdrawalId, WithdrawalStatus};

use crate::error::ServiceError;
use crate::services::MAX_COMMIT_ATTEMPTS;

/// Orchestrates the withdrawal approval state machine against a
/// [`LedgerStore`].
#[derive(Debug)]
pub struct WithdrawalService<S> {
    store: Arc<S>,
}

impl<S> Clone for WithdrawalService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> WithdrawalService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn require_wallet(&self, id: WalletId) -> Result<Wallet, ServiceError> {
        self.store
            .wallet(id)
            .await?
            .ok_or_else(|| DomainError::WalletNotFound.into())
    }

    async fn require_withdrawal(&self, id: WithdrawalId) -> Result<Withdrawal, ServiceError> {
        self.store
            .withdrawal(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {id}")).into())
    }

    /// File a withdrawal request in `Pending`.
    ///
    /// The balance check here is advisory: it catches obviously hopeless
    /// requests early, but the binding check happens at completion.
    #[instrument(skip(self, payment_details), fields(wallet_id = %wallet_id, amount = %amount), err)]
    pub async fn request(
        &self,
        wallet_id: WalletId,
        amount: Money,
        payment_method: &str,
        payment_details: &str,
    ) -> Result<Withdrawal, ServiceError> {
        let wallet = self.require_wallet(wallet_id).await?;
        if amount.currency() != wallet.currency() {
            return Err(DomainError::CurrencyMismatch {
                expected: wallet.currency(),
                actual: amount.currency(),
            }
            .into());
        }
        if amount.minor() > wallet.balance().minor() {
            return Err(DomainError::invalid_amount(format!(
                "withdrawal of {amount} exceeds balance {}",
                wallet.balance()
            ))
            .into());
        }

        let withdrawal = Withdrawal::request(
            WithdrawalId::new(AggregateId::new()),
            wallet_id,
            amount,
            payment_method,
            payment_details,
            Utc::now(),
        )?;
        self.store
            .commit(LedgerCommit::new().withdrawal(withdrawal.clone(), ExpectedVersion::Exact(0)))
            .await?;
        Ok(withdrawal)
    }

    /// Approve a pending request.
    #[instrument(skip(self), fields(withdrawal_id = %id, approver = %approver), err)]
    pub async fn approve(
        &self,
        id: WithdrawalId,
        approver: UserId,
    ) -> Result<Withdrawal, ServiceError> {
        let mut withdrawal = self.require_withdrawal(id).await?;
        let expected = ExpectedVersion::Exact(withdrawal.version());
        withdrawal.approve(approver, Utc::now())?;
        self.store
            .commit(LedgerCommit::new().withdrawal(withdrawal.clone(), expected))
            .await?;
        Ok(withdrawal)
    }

    /// Reject a pending request. Terminal; no funds move.
    #[instrument(skip(self, reason), fields(withdrawal_id = %id), err)]
    pub async fn reject(&self, id: WithdrawalId, reason: &str) -> Result<Withdrawal, ServiceError> {
        let mut withdrawal = self.require_withdrawal(id).await?;
        let expected = ExpectedVersion::Exact(withdrawal.version());
        withdrawal.reject(reason, Utc::now())?;
        self.store
            .commit(LedgerCommit::new().withdrawal(withdrawal.clone(), expected))
            .await?;
        Ok(withdrawal)
    }

    /// Complete an approved withdrawal: debit the wallet, journal the
    /// posting, and mark the record `Completed`, all in one commit.
    ///
    /// Completing an already-completed withdrawal is a no-op returning the
    /// stored record. An insufficient balance leaves the withdrawal
    /// `Approved` so it can be completed after the wallet is funded.
    #[instrument(skip(self), fields(withdrawal_id = %id), err)]
    pub async fn complete(&self, id: WithdrawalId) -> Result<Withdrawal, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut withdrawal = self.require_withdrawal(id).await?;
            if withdrawal.status() == WithdrawalStatus::Completed {
                return Ok(withdrawal);
            }
            let withdrawal_expected = ExpectedVersion::Exact(withdrawal.version());

            let mut wallet = self.require_wallet(withdrawal.wallet_id()).await?;
            let wallet_expected = ExpectedVersion::Exact(wallet.version());

            let now = Utc::now();
            let transaction_id = TransactionId::new(AggregateId::new());
            // Status transition first: a rejected or pending withdrawal must
            // report the transition error even when the balance is also short.
            withdrawal.complete(transaction_id, now)?;
            wallet.debit(withdrawal.amount(), now)?;

            let entry = Transaction::debit(
                transaction_id,
                wallet.id_typed(),
                withdrawal.amount(),
                EntityRef::new("withdrawal", withdrawal.id_typed().to_string()),
                withdrawal.completion_key(),
                now,
            )?;

            match self
                .store
                .commit(
                    LedgerCommit::new()
                        .wallet(wallet, wallet_expected)
                        .withdrawal(withdrawal.clone(), withdrawal_expected)
                        .entry(entry),
                )
                .await
            {
                Ok(()) => return Ok(withdrawal),
                Err(StoreError::DuplicateIdempotencyKey(_)) => {
                    // A racing completion already posted the debit; its
                    // record is authoritative.
                    return self.require_withdrawal(id).await;
                }
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, error = %e, "withdrawal completion conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LedgerService;
    use payvault_core::Currency;
    use payvault_infra::InMemoryLedgerStore;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn money(s: &str) -> Money {
        Money::parse(s, usd()).unwrap()
    }

    struct Fixture {
        ledger: LedgerService<InMemoryLedgerStore>,
        withdrawals: WithdrawalService<InMemoryLedgerStore>,
        store: Arc<InMemoryLedgerStore>,
        owner: UserId,
        wallet_id: WalletId,
    }

    async fn funded_fixture(balance: &str) -> Fixture {
        payvault_observability::init();
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = LedgerService::new(Arc::clone(&store));
        let withdrawals = WithdrawalService::new(Arc::clone(&store));
        let owner = UserId::new();
        let wallet = ledger.open_wallet(owner, usd()).await.unwrap();
        if balance != "0" {
            ledger
                .credit(owner, money(balance), EntityRef::new("recharge", "seed"))
                .await
                .unwrap();
        }
        Fixture {
            ledger,
            withdrawals,
            store,
            owner,
            wallet_id: wallet.id_typed(),
        }
    }

    #[tokio::test]
    async fn request_approve_complete_debits_once() {
        let fx = funded_fixture("100").await;
        let w = fx
            .withdrawals
            .request(fx.wallet_id, money("60"), "bank_transfer", "account 123")
            .await
            .unwrap();
        fx.withdrawals.approve(w.id_typed(), UserId::new()).await.unwrap();
        let done = fx.withdrawals.complete(w.id_typed()).await.unwrap();

        assert_eq!(done.status(), WithdrawalStatus::Completed);
        assert!(done.transaction_id().is_some());
        assert_eq!(fx.ledger.balance(fx.owner, usd()).await.unwrap(), money("40"));
        assert_eq!(fx.store.entry_count(), 2); // seed credit + completion debit
    }

    #[tokio::test]
    async fn complete_twice_is_a_no_op() {
        let fx = funded_fixture("100").await;
        let w = fx
            .withdrawals
            .request(fx.wallet_id, money("60"), "bank_transfer", "account 123")
            .await
            .unwrap();
        fx.withdrawals.approve(w.id_typed(), UserId::new()).await.unwrap();
        let first = fx.withdrawals.complete(w.id_typed()).await.unwrap();
        let second = fx.withdrawals.complete(w.id_typed()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.ledger.balance(fx.owner, usd()).await.unwrap(), money("40"));
        assert_eq!(fx.store.entry_count(), 2);
    }

    #[tokio::test]
    async fn approve_after_reject_is_invalid() {
        let fx = funded_fixture("100").await;
        let w = fx
            .withdrawals
            .request(fx.wallet_id, money("60"), "bank_transfer", "account 123")
            .await
            .unwrap();
        fx.withdrawals
            .reject(w.id_typed(), "payout details unverified")
            .await
            .unwrap();

        let err = fx
            .withdrawals
            .approve(w.id_typed(), UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InvalidStateTransition(_))
        ));

        let stored = fx.store.withdrawal(w.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.status(), WithdrawalStatus::Rejected);
    }

    #[tokio::test]
    async fn complete_without_approval_is_invalid() {
        let fx = funded_fixture("100").await;
        let w = fx
            .withdrawals
            .request(fx.wallet_id, money("60"), "bank_transfer", "account 123")
            .await
            .unwrap();

        let err = fx.withdrawals.complete(w.id_typed()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InvalidStateTransition(_))
        ));
        assert_eq!(fx.ledger.balance(fx.owner, usd()).await.unwrap(), money("100"));
    }

    #[tokio::test]
    async fn request_beyond_balance_is_rejected_up_front() {
        let fx = funded_fixture("50").await;
        let err = fx
            .withdrawals
            .request(fx.wallet_id, money("60"), "bank_transfer", "account 123")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn completion_revalidates_the_balance() {
        let fx = funded_fixture("100").await;
        let w = fx
            .withdrawals
            .request(fx.wallet_id, money("80"), "bank_transfer", "account 123")
            .await
            .unwrap();
        fx.withdrawals.approve(w.id_typed(), UserId::new()).await.unwrap();

        // Funds are spent between approval and completion.
        fx.ledger
            .debit(fx.owner, money("50"), EntityRef::new("purchase", "p-1"))
            .await
            .unwrap();

        let err = fx.withdrawals.complete(w.id_typed()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::InsufficientBalance { .. })
        ));

        // The withdrawal stays approved and completes once refunded.
        let stored = fx.store.withdrawal(w.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.status(), WithdrawalStatus::Approved);

        fx.ledger
            .credit(fx.owner, money("40"), EntityRef::new("recharge", "r-2"))
            .await
            .unwrap();
        let done = fx.withdrawals.complete(w.id_typed()).await.unwrap();
        assert_eq!(done.status(), WithdrawalStatus::Completed);
        assert_eq!(fx.ledger.balance(fx.owner, usd()).await.unwrap(), money("10"));
    }
}
