//! Credit, debit, and transfer orchestration.
//!
//! Every operation follows the same shape: load the wallet(s), mutate the
//! aggregates in memory, pair the mutation with a journal entry, and push
//! everything through one atomic [`LedgerCommit`] guarded by the versions
//! that were loaded. A version conflict means another writer got there
//! first; the operation reloads and retries a bounded number of times.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use payvault_core::{AggregateId, AggregateRoot, Currency, DomainError, ExpectedVersion, Money, UserId};
use payvault_infra::{LedgerCommit, LedgerStore};
use payvault_ledger::{EntityRef, IdempotencyKey, Transaction, TransactionId};
use payvault_wallet::{Wallet, WalletId};

use crate::error::ServiceError;

/// Bounded retries for commits that lose an optimistic-concurrency race.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Outcome of a single-wallet posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub transaction_id: TransactionId,
    pub previous: Money,
    /// Signed change applied to the balance; negative for debits.
    pub delta: Money,
    pub new_balance: Money,
}

/// Outcome of a transfer between two wallets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub source_wallet_id: WalletId,
    pub destination_wallet_id: WalletId,
    pub source_previous: Money,
    pub source_new: Money,
    pub destination_previous: Money,
    pub destination_new: Money,
}

/// Orchestrates balance-affecting operations against a [`LedgerStore`].
#[derive(Debug)]
pub struct LedgerService<S> {
    store: Arc<S>,
}

impl<S> Clone for LedgerService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Provision a wallet for `owner` in `currency`. At most one wallet per
    /// owner and currency; the store rejects a second with a conflict.
    #[instrument(skip(self), fields(owner = %owner, currency = %currency), err)]
    pub async fn open_wallet(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Wallet, ServiceError> {
        let wallet = Wallet::open(WalletId::new(AggregateId::new()), owner, currency, Utc::now());
        self.store
            .commit(LedgerCommit::new().wallet(wallet.clone(), ExpectedVersion::Exact(0)))
            .await?;
        Ok(wallet)
    }

    /// Current balance of the owner's wallet in `currency`.
    pub async fn balance(&self, owner: UserId, currency: Currency) -> Result<Money, ServiceError> {
        Ok(self.wallet_for_owner(owner, currency).await?.balance())
    }

    pub(crate) async fn wallet_for_owner(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Wallet, ServiceError> {
        self.store
            .wallet_for_owner(owner, currency)
            .await?
            .ok_or_else(|| DomainError::WalletNotFound.into())
    }

    /// Credit the owner's wallet and journal the posting atomically.
    ///
    /// The idempotency key derives from the related business entity, so a
    /// retried credit for the same entity is rejected with
    /// `DuplicateIdempotencyKey` instead of posting twice.
    ///
    /// The wallet is looked up by `(owner, amount.currency())`. An amount
    /// in a currency the owner holds no wallet for therefore surfaces as
    /// `WalletNotFound`; `CurrencyMismatch` is raised by the wallet itself
    /// when a loaded wallet is handed an operand in another currency.
    #[instrument(skip(self, related), fields(owner = %owner, amount = %amount), err)]
    pub async fn credit(
        &self,
        owner: UserId,
        amount: Money,
        related: EntityRef,
    ) -> Result<BalanceChange, ServiceError> {
        let key = IdempotencyKey::derive(&related.entity_type, &related.entity_id, "credit");
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut wallet = self.wallet_for_owner(owner, amount.currency()).await?;
            let previous = wallet.balance();
            let expected = ExpectedVersion::Exact(wallet.version());
            let now = Utc::now();
            wallet.credit(amount, now)?;
            let new_balance = wallet.balance();
            let entry = Transaction::credit(
                TransactionId::new(AggregateId::new()),
                wallet.id_typed(),
                amount,
                related.clone(),
                key.clone(),
                now,
            )?;
            let transaction_id = entry.id();

            match self
                .store
                .commit(LedgerCommit::new().wallet(wallet, expected).entry(entry))
                .await
            {
                Ok(()) => {
                    return Ok(BalanceChange {
                        transaction_id,
                        previous,
                        delta: amount,
                        new_balance,
                    });
                }
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, error = %e, "credit commit conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Debit the owner's wallet and journal the posting atomically.
    ///
    /// Like [`LedgerService::credit`], the wallet is looked up by
    /// `(owner, amount.currency())`, so a debit in a currency the owner
    /// holds no wallet for surfaces as `WalletNotFound`.
    #[instrument(skip(self, related), fields(owner = %owner, amount = %amount), err)]
    pub async fn debit(
        &self,
        owner: UserId,
        amount: Money,
        related: EntityRef,
    ) -> Result<BalanceChange, ServiceError> {
        let key = IdempotencyKey::derive(&related.entity_type, &related.entity_id, "debit");
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut wallet = self.wallet_for_owner(owner, amount.currency()).await?;
            let previous = wallet.balance();
            let expected = ExpectedVersion::Exact(wallet.version());
            let now = Utc::now();
            wallet.debit(amount, now)?;
            let new_balance = wallet.balance();
            let entry = Transaction::debit(
                TransactionId::new(AggregateId::new()),
                wallet.id_typed(),
                amount,
                related.clone(),
                key.clone(),
                now,
            )?;
            let transaction_id = entry.id();

            match self
                .store
                .commit(LedgerCommit::new().wallet(wallet, expected).entry(entry))
                .await
            {
                Ok(()) => {
                    return Ok(BalanceChange {
                        transaction_id,
                        previous,
                        delta: Money::from_minor(-amount.minor(), amount.currency()),
                        new_balance,
                    });
                }
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, error = %e, "debit commit conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move funds between two owners' wallets.
    ///
    /// Both wallet updates and the single `Transfer` journal entry commit
    /// atomically; the sender is debited and the receiver credited, or
    /// neither.
    #[instrument(skip(self, related), fields(from = %from, to = %to, amount = %amount), err)]
    pub async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Money,
        related: Option<EntityRef>,
    ) -> Result<TransferReceipt, ServiceError> {
        if from == to {
            return Err(DomainError::SelfTransferNotAllowed.into());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut source = self.wallet_for_owner(from, amount.currency()).await?;
            let mut destination = self.wallet_for_owner(to, amount.currency()).await?;
            let source_previous = source.balance();
            let destination_previous = destination.balance();
            let source_expected = ExpectedVersion::Exact(source.version());
            let destination_expected = ExpectedVersion::Exact(destination.version());

            let now = Utc::now();
            source.debit(amount, now)?;
            destination.credit(amount, now)?;

            let transaction_id = TransactionId::new(AggregateId::new());
            let related = related
                .clone()
                .unwrap_or_else(|| EntityRef::new("transfer", transaction_id.to_string()));
            let key = IdempotencyKey::derive(&related.entity_type, &related.entity_id, "transfer");
            let entry = Transaction::transfer(
                transaction_id,
                source.id_typed(),
                destination.id_typed(),
                amount,
                related,
                key,
                now,
            )?;

            let receipt = TransferReceipt {
                transaction_id,
                source_wallet_id: source.id_typed(),
                destination_wallet_id: destination.id_typed(),
                source_previous,
                source_new: source.balance(),
                destination_previous,
                destination_new: destination.balance(),
            };

            match self
                .store
                .commit(
                    LedgerCommit::new()
                        .wallet(source, source_expected)
                        .wallet(destination, destination_expected)
                        .entry(entry),
                )
                .await
            {
                Ok(()) => return Ok(receipt),
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, error = %e, "transfer commit conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
