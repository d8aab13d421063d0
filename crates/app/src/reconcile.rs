//! Reconciliation as a read-only service over the store.

use std::sync::Arc;

use tracing::instrument;

use payvault_core::DomainError;
use payvault_infra::LedgerStore;
use payvault_ledger::{reconcile, ReconciliationReport};
use payvault_wallet::WalletId;

use crate::error::ServiceError;

/// Replays a wallet's journal against its stored balance. Never writes.
#[derive(Debug)]
pub struct ReconciliationService<S> {
    store: Arc<S>,
}

impl<S> Clone for ReconciliationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> ReconciliationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(wallet_id = %wallet_id), err)]
    pub async fn reconcile(&self, wallet_id: WalletId) -> Result<ReconciliationReport, ServiceError> {
        let wallet = self
            .store
            .wallet(wallet_id)
            .await?
            .ok_or(DomainError::WalletNotFound)?;
        let entries = self.store.entries_for_wallet(wallet_id).await?;
        Ok(reconcile(&wallet, &entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LedgerService;
    use crate::withdrawals::WithdrawalService;
    use chrono::Utc;
    use payvault_core::{AggregateRoot, Currency, ExpectedVersion, Money, UserId};
    use payvault_infra::{InMemoryLedgerStore, LedgerCommit};
    use payvault_ledger::{EntityRef, ReconciliationOutcome};

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn money(s: &str) -> Money {
        Money::parse(s, usd()).unwrap()
    }

    #[tokio::test]
    async fn full_history_reconciles_balanced() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = LedgerService::new(Arc::clone(&store));
        let withdrawals = WithdrawalService::new(Arc::clone(&store));
        let recon = ReconciliationService::new(Arc::clone(&store));

        let owner = UserId::new();
        let wallet = ledger.open_wallet(owner, usd()).await.unwrap();
        ledger
            .credit(owner, money("200"), EntityRef::new("recharge", "r-1"))
            .await
            .unwrap();
        ledger
            .debit(owner, money("45.5"), EntityRef::new("purchase", "p-1"))
            .await
            .unwrap();
        let w = withdrawals
            .request(wallet.id_typed(), money("30"), "bank_transfer", "account 123")
            .await
            .unwrap();
        withdrawals.approve(w.id_typed(), UserId::new()).await.unwrap();
        withdrawals.complete(w.id_typed()).await.unwrap();

        let report = recon.reconcile(wallet.id_typed()).await.unwrap();
        assert!(report.is_balanced());
        assert_eq!(report.stored_balance, money("124.5"));
    }

    #[tokio::test]
    async fn tampered_balance_is_reported_not_corrected() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = LedgerService::new(Arc::clone(&store));
        let recon = ReconciliationService::new(Arc::clone(&store));

        let owner = UserId::new();
        let wallet = ledger.open_wallet(owner, usd()).await.unwrap();
        ledger
            .credit(owner, money("100"), EntityRef::new("recharge", "r-1"))
            .await
            .unwrap();

        // Balance drifts without a matching journal entry.
        let mut drifted = store.wallet(wallet.id_typed()).await.unwrap().unwrap();
        let expected = ExpectedVersion::Exact(drifted.version());
        drifted.credit(money("25"), Utc::now()).unwrap();
        store
            .commit(LedgerCommit::new().wallet(drifted, expected))
            .await
            .unwrap();

        let report = recon.reconcile(wallet.id_typed()).await.unwrap();
        match &report.outcome {
            ReconciliationOutcome::Discrepancy { delta_minor, .. } => {
                assert_eq!(*delta_minor, money("25").minor() as i128);
            }
            other => panic!("expected discrepancy, got {other:?}"),
        }

        // Stored state is untouched by reconciliation.
        let stored = store.wallet(wallet.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.balance(), money("125"));
    }

    #[tokio::test]
    async fn unknown_wallet_is_wallet_not_found() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let recon = ReconciliationService::new(store);
        let err = recon
            .reconcile(WalletId::new(payvault_core::AggregateId::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::WalletNotFound)
        ));
    }
}
