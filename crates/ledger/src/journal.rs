use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use payvault_core::{AggregateId, DomainError, DomainResult, Money};
use payvault_wallet::WalletId;

/// Journal entry identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub AggregateId);

impl TransactionId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of journal entry. The kind fixes which wallet references are set:
/// a credit names only a destination, a debit only a source, a transfer both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
            TransactionKind::Transfer => "transfer",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionKind::Credit),
            "debit" => Ok(TransactionKind::Debit),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(DomainError::invalid_id(format!("transaction kind: {other:?}"))),
        }
    }
}

/// Free-form link back to the business event that caused a posting
/// (purchase, recharge, withdrawal, commission).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Globally unique token making retried postings detectable.
///
/// Keys derive from the identity of the business operation, never from
/// wall-clock time: a retry of the same operation produces the same key and
/// is rejected by the journal's uniqueness constraint instead of posting
/// twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Deterministic derivation from business identity, e.g.
    /// `derive("withdrawal", "<uuid>", "complete")`.
    pub fn derive(entity_type: &str, entity_id: &str, operation: &str) -> Self {
        Self(format!("{entity_type}:{entity_id}:{operation}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for IdempotencyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single journal entry. Immutable once written; the journal is
/// append-only and entries are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    amount: Money,
    source_wallet_id: Option<WalletId>,
    destination_wallet_id: Option<WalletId>,
    related: EntityRef,
    idempotency_key: IdempotencyKey,
    created_at: DateTime<Utc>,
}

impl Transaction {
    /// A credit posting: funds flowing into `destination`.
    pub fn credit(
        id: TransactionId,
        destination: WalletId,
        amount: Money,
        related: EntityRef,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::ensure_positive(&amount)?;
        Ok(Self {
            id,
            kind: TransactionKind::Credit,
            amount,
            source_wallet_id: None,
            destination_wallet_id: Some(destination),
            related,
            idempotency_key,
            created_at,
        })
    }

    /// A debit posting: funds flowing out of `source`.
    pub fn debit(
        id: TransactionId,
        source: WalletId,
        amount: Money,
        related: EntityRef,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::ensure_positive(&amount)?;
        Ok(Self {
            id,
            kind: TransactionKind::Debit,
            amount,
            source_wallet_id: Some(source),
            destination_wallet_id: None,
            related,
            idempotency_key,
            created_at,
        })
    }

    /// A transfer posting: one entry carrying both wallet references.
    pub fn transfer(
        id: TransactionId,
        source: WalletId,
        destination: WalletId,
        amount: Money,
        related: EntityRef,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::ensure_positive(&amount)?;
        if source == destination {
            return Err(DomainError::SelfTransferNotAllowed);
        }
        Ok(Self {
            id,
            kind: TransactionKind::Transfer,
            amount,
            source_wallet_id: Some(source),
            destination_wallet_id: Some(destination),
            related,
            idempotency_key,
            created_at,
        })
    }

    /// Rehydrate an entry from stored columns. Intended for store
    /// implementations; the kind/wallet-reference shape is trusted.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: TransactionId,
        kind: TransactionKind,
        amount: Money,
        source_wallet_id: Option<WalletId>,
        destination_wallet_id: Option<WalletId>,
        related: EntityRef,
        idempotency_key: IdempotencyKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            amount,
            source_wallet_id,
            destination_wallet_id,
            related,
            idempotency_key,
            created_at,
        }
    }

    fn ensure_positive(amount: &Money) -> DomainResult<()> {
        if !amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "journal amounts must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn source_wallet_id(&self) -> Option<WalletId> {
        self.source_wallet_id
    }

    pub fn destination_wallet_id(&self) -> Option<WalletId> {
        self.destination_wallet_id
    }

    pub fn related(&self) -> &EntityRef {
        &self.related
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Does this entry reference the wallet, as source or destination?
    pub fn touches(&self, wallet_id: WalletId) -> bool {
        self.source_wallet_id == Some(wallet_id) || self.destination_wallet_id == Some(wallet_id)
    }

    /// Signed contribution of this entry to the wallet's balance, in minor
    /// units. Zero when the entry does not reference the wallet.
    pub fn signed_minor_for(&self, wallet_id: WalletId) -> i64 {
        let mut delta = 0i64;
        if self.destination_wallet_id == Some(wallet_id) {
            delta += self.amount.minor();
        }
        if self.source_wallet_id == Some(wallet_id) {
            delta -= self.amount.minor();
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payvault_core::Currency;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn wallet_id() -> WalletId {
        WalletId::new(AggregateId::new())
    }

    fn money(s: &str) -> Money {
        Money::parse(s, usd()).unwrap()
    }

    fn related() -> EntityRef {
        EntityRef::new("purchase", "p-1")
    }

    #[test]
    fn credit_sets_destination_only() {
        let dest = wallet_id();
        let tx = Transaction::credit(
            TransactionId::new(AggregateId::new()),
            dest,
            money("10"),
            related(),
            IdempotencyKey::derive("purchase", "p-1", "credit"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.destination_wallet_id(), Some(dest));
        assert_eq!(tx.source_wallet_id(), None);
        assert_eq!(tx.signed_minor_for(dest), 100_000);
    }

    #[test]
    fn debit_sets_source_only() {
        let source = wallet_id();
        let tx = Transaction::debit(
            TransactionId::new(AggregateId::new()),
            source,
            money("10"),
            related(),
            IdempotencyKey::derive("purchase", "p-1", "debit"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.source_wallet_id(), Some(source));
        assert_eq!(tx.destination_wallet_id(), None);
        assert_eq!(tx.signed_minor_for(source), -100_000);
    }

    #[test]
    fn transfer_sets_both_and_rejects_self() {
        let a = wallet_id();
        let b = wallet_id();
        let tx = Transaction::transfer(
            TransactionId::new(AggregateId::new()),
            a,
            b,
            money("10"),
            related(),
            IdempotencyKey::derive("transfer", "t-1", "post"),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(tx.signed_minor_for(a), -100_000);
        assert_eq!(tx.signed_minor_for(b), 100_000);
        assert_eq!(tx.signed_minor_for(wallet_id()), 0);

        let err = Transaction::transfer(
            TransactionId::new(AggregateId::new()),
            a,
            a,
            money("10"),
            related(),
            IdempotencyKey::derive("transfer", "t-2", "post"),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, DomainError::SelfTransferNotAllowed);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(Transaction::credit(
            TransactionId::new(AggregateId::new()),
            wallet_id(),
            Money::zero(usd()),
            related(),
            IdempotencyKey::derive("purchase", "p-1", "credit"),
            Utc::now(),
        )
        .is_err());
    }

    #[test]
    fn idempotency_keys_are_deterministic() {
        let a = IdempotencyKey::derive("withdrawal", "w-9", "complete");
        let b = IdempotencyKey::derive("withdrawal", "w-9", "complete");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "withdrawal:w-9:complete");
        assert_ne!(a, IdempotencyKey::derive("withdrawal", "w-9", "approve"));
    }
}
