use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use payvault_core::{
    AggregateId, AggregateRoot, Currency, DomainError, DomainResult, Money, UserId,
};

/// Wallet identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub AggregateId);

impl WalletId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WalletId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Wallet lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    /// Administrative hold: balance preserved, all mutation blocked.
    Frozen,
    /// Terminal. Only reachable with a zero balance.
    Closed,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }
}

impl FromStr for WalletStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(WalletStatus::Active),
            "frozen" => Ok(WalletStatus::Frozen),
            "closed" => Ok(WalletStatus::Closed),
            other => Err(DomainError::invalid_id(format!("wallet status: {other:?}"))),
        }
    }
}

/// Aggregate root: Wallet.
///
/// One wallet per user per currency. The balance never goes negative and is
/// only mutated through `credit`/`debit`; persistence and journaling are the
/// caller's responsibility, paired in one atomic commit by the store layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    id: WalletId,
    owner_id: UserId,
    balance: Money,
    status: WalletStatus,
    version: u64,
    updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Open a new wallet with a zero balance.
    pub fn open(id: WalletId, owner_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            balance: Money::zero(currency),
            status: WalletStatus::Active,
            version: 1,
            updated_at: now,
        }
    }

    /// Rehydrate a wallet from stored state. Intended for store
    /// implementations; domain invariants are assumed to hold already.
    pub fn from_stored(
        id: WalletId,
        owner_id: UserId,
        balance: Money,
        status: WalletStatus,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            balance,
            status,
            version,
            updated_at,
        }
    }

    pub fn id_typed(&self) -> WalletId {
        self.id
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn currency(&self) -> Currency {
        self.balance.currency()
    }

    pub fn status(&self) -> WalletStatus {
        self.status
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn ensure_active(&self) -> DomainResult<()> {
        match self.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Frozen => Err(DomainError::WalletFrozen),
            WalletStatus::Closed => Err(DomainError::WalletClosed),
        }
    }

    fn ensure_operand(&self, amount: &Money) -> DomainResult<()> {
        if amount.currency() != self.balance.currency() {
            return Err(DomainError::CurrencyMismatch {
                expected: self.balance.currency(),
                actual: amount.currency(),
            });
        }
        if !amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    /// Increase the balance. Requires an active wallet, a positive amount
    /// and a matching currency.
    pub fn credit(&mut self, amount: Money, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.ensure_operand(&amount)?;
        self.balance = self.balance.checked_add(amount)?;
        self.touch(now);
        Ok(())
    }

    /// Decrease the balance. Same preconditions as `credit`, plus the
    /// balance must cover the amount; the error reports the shortfall.
    pub fn debit(&mut self, amount: Money, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.ensure_operand(&amount)?;
        if self.balance.compare(&amount)? == core::cmp::Ordering::Less {
            return Err(DomainError::InsufficientBalance {
                shortfall: amount.checked_sub(self.balance)?,
            });
        }
        self.balance = self.balance.checked_sub(amount)?;
        self.touch(now);
        Ok(())
    }

    /// Place an administrative hold. Only an active wallet can be frozen.
    pub fn freeze(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            WalletStatus::Active => {
                self.status = WalletStatus::Frozen;
                self.touch(now);
                Ok(())
            }
            WalletStatus::Frozen => Err(DomainError::invalid_transition("wallet already frozen")),
            WalletStatus::Closed => Err(DomainError::WalletClosed),
        }
    }

    /// Lift an administrative hold.
    pub fn unfreeze(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        match self.status {
            WalletStatus::Frozen => {
                self.status = WalletStatus::Active;
                self.touch(now);
                Ok(())
            }
            WalletStatus::Active => Err(DomainError::invalid_transition("wallet is not frozen")),
            WalletStatus::Closed => Err(DomainError::WalletClosed),
        }
    }

    /// Close the wallet. Only permitted with a zero balance; closed is
    /// terminal.
    pub fn close(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == WalletStatus::Closed {
            return Err(DomainError::WalletClosed);
        }
        if !self.balance.is_zero() {
            return Err(DomainError::invalid_transition(
                "cannot close a wallet with a nonzero balance",
            ));
        }
        self.status = WalletStatus::Closed;
        self.touch(now);
        Ok(())
    }
}

impl AggregateRoot for Wallet {
    type Id = WalletId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
