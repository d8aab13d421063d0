//! Storage contract for wallets, withdrawals, and the journal.
//!
//! The central idea is the [`LedgerCommit`]: every balance-affecting
//! operation collects its wallet/withdrawal updates and journal entries into
//! one commit, and the store applies the whole commit atomically or not at
//! all. Optimistic concurrency is carried per aggregate write via
//! [`ExpectedVersion`].

use async_trait::async_trait;
use thiserror::Error;

use payvault_core::{Currency, ExpectedVersion, UserId};
use payvault_ledger::{IdempotencyKey, Transaction};
use payvault_wallet::{Wallet, WalletId};
use payvault_withdrawals::{Withdrawal, WithdrawalId};

/// Errors surfaced by ledger stores.
///
/// `Conflict` and `DuplicateIdempotencyKey` are expected outcomes under
/// concurrency; callers decide whether to retry or resolve. `Backend` wraps
/// everything infrastructural.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An optimistic version check failed: someone else wrote first.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// A journal entry with the same idempotency key already exists.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage backend failure (connection, IO, corrupt row).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// A wallet state to persist, guarded by the version the caller loaded.
///
/// `ExpectedVersion::Exact(0)` expresses "this wallet must not exist yet"
/// and turns the write into an insert.
#[derive(Debug, Clone)]
pub struct WalletWrite {
    pub wallet: Wallet,
    pub expected: ExpectedVersion,
}

/// A withdrawal state to persist, guarded like [`WalletWrite`].
#[derive(Debug, Clone)]
pub struct WithdrawalWrite {
    pub withdrawal: Withdrawal,
    pub expected: ExpectedVersion,
}

/// Atomic unit of work against the ledger store.
///
/// All wallet writes, withdrawal writes, and journal appends in one commit
/// land together or not at all. Journal entries are append-only; a commit
/// never updates or deletes an existing entry.
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    pub wallets: Vec<WalletWrite>,
    pub withdrawals: Vec<WithdrawalWrite>,
    pub entries: Vec<Transaction>,
}

impl LedgerCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet(mut self, wallet: Wallet, expected: ExpectedVersion) -> Self {
        self.wallets.push(WalletWrite { wallet, expected });
        self
    }

    pub fn withdrawal(mut self, withdrawal: Withdrawal, expected: ExpectedVersion) -> Self {
        self.withdrawals.push(WithdrawalWrite { withdrawal, expected });
        self
    }

    pub fn entry(mut self, entry: Transaction) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty() && self.withdrawals.is_empty() && self.entries.is_empty()
    }
}

/// Persistence contract for the wallet ledger.
///
/// Implementations must guarantee:
/// - `commit` is atomic across every write it carries;
/// - version guards are checked for every aggregate write;
/// - idempotency keys are unique across the whole journal.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load a wallet by id.
    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    /// Load the wallet owned by `owner` in `currency`. At most one exists.
    async fn wallet_for_owner(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError>;

    /// Load a withdrawal by id.
    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError>;

    /// All journal entries referencing the wallet, in insertion order.
    async fn entries_for_wallet(&self, id: WalletId) -> Result<Vec<Transaction>, StoreError>;

    /// The journal entry carrying the given idempotency key, if any.
    async fn entry_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Apply a commit atomically.
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;
}
