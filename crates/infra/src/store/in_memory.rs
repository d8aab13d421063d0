//! In-memory ledger store for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use payvault_core::{AggregateRoot, Currency, ExpectedVersion, UserId};
use payvault_ledger::{IdempotencyKey, Transaction};
use payvault_wallet::{Wallet, WalletId};
use payvault_withdrawals::{Withdrawal, WithdrawalId};

use super::r#trait::{LedgerCommit, LedgerStore, StoreError};

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    /// One wallet per (owner, currency); mirrors the database's unique index.
    owners: HashMap<(UserId, Currency), WalletId>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
    entries: Vec<Transaction>,
    keys: HashSet<IdempotencyKey>,
}

/// Thread-safe in-memory implementation of [`LedgerStore`].
///
/// A single `RwLock` over the whole state makes every commit trivially
/// atomic: validation and application happen under one write guard, so a
/// concurrent commit sees either all of a commit's effects or none.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of journal entries, for test assertions.
    pub fn entry_count(&self) -> usize {
        self.state.read().expect("ledger state lock poisoned").entries.len()
    }
}

fn validate(state: &State, commit: &LedgerCommit) -> Result<(), StoreError> {
    for write in &commit.wallets {
        let id = write.wallet.id_typed();
        let current = state.wallets.get(&id).map(|w| w.version()).unwrap_or(0);
        if !write.expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "wallet {id}: expected {:?}, found version {current}",
                write.expected
            )));
        }
        if current == 0 {
            let owner_key = (write.wallet.owner_id(), write.wallet.currency());
            if state.owners.contains_key(&owner_key) {
                return Err(StoreError::Conflict(format!(
                    "wallet already exists for owner {} in {}",
                    owner_key.0, owner_key.1
                )));
            }
        }
    }

    for write in &commit.withdrawals {
        let id = write.withdrawal.id_typed();
        if matches!(write.expected, ExpectedVersion::Any) {
            return Err(StoreError::Backend(
                "withdrawal writes require an exact expected version".to_string(),
            ));
        }
        let current = state.withdrawals.get(&id).map(|w| w.version()).unwrap_or(0);
        if !write.expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "withdrawal {id}: expected {:?}, found version {current}",
                write.expected
            )));
        }
    }

    // Keys must be unique against the journal AND within the commit itself.
    let mut seen = HashSet::new();
    for entry in &commit.entries {
        let key = entry.idempotency_key();
        if state.keys.contains(key) || !seen.insert(key) {
            return Err(StoreError::DuplicateIdempotencyKey(key.to_string()));
        }
    }

    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        let state = self.state.read().expect("ledger state lock poisoned");
        Ok(state.wallets.get(&id).cloned())
    }

    async fn wallet_for_owner(
        &self,
        owner: UserId,
        currency: Currency,
    ) -> Result<Option<Wallet>, StoreError> {
        let state = self.state.read().expect("ledger state lock poisoned");
        Ok(state
            .owners
            .get(&(owner, currency))
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<Withdrawal>, StoreError> {
        let state = self.state.read().expect("ledger state lock poisoned");
        Ok(state.withdrawals.get(&id).cloned())
    }

    async fn entries_for_wallet(&self, id: WalletId) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().expect("ledger state lock poisoned");
        Ok(state
            .entries
            .iter()
            .filter(|e| e.touches(id))
            .cloned()
            .collect())
    }

    async fn entry_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().expect("ledger state lock poisoned");
        Ok(state
            .entries
            .iter()
            .find(|e| e.idempotency_key() == key)
            .cloned())
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        if commit.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().expect("ledger state lock poisoned");

        // Validate everything before touching anything; a failed commit must
        // leave no partial effects.
        validate(&state, &commit)?;

        for write in commit.wallets {
            let id = write.wallet.id_typed();
            let owner_key = (write.wallet.owner_id(), write.wallet.currency());
            state.owners.insert(owner_key, id);
            state.wallets.insert(id, write.wallet);
        }
        for write in commit.withdrawals {
            state
                .withdrawals
                .insert(write.withdrawal.id_typed(), write.withdrawal);
        }
        for entry in commit.entries {
            state.keys.insert(entry.idempotency_key().clone());
            state.entries.push(entry);
        }

        Ok(())
    }
}
