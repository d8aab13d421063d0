use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use payvault_core::{AggregateId, AggregateRoot, DomainError, DomainResult, Money, UserId};
use payvault_ledger::{IdempotencyKey, TransactionId};
use payvault_wallet::WalletId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(pub AggregateId);

impl WithdrawalId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a withdrawal request.
///
/// Pending -> Approved -> Completed, with Pending -> Rejected as the only
/// other edge. Rejected and Completed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Completed => "completed",
        }
    }
}

impl FromStr for WithdrawalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "approved" => Ok(WithdrawalStatus::Approved),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            "completed" => Ok(WithdrawalStatus::Completed),
            other => Err(DomainError::invalid_id(format!("withdrawal status: {other:?}"))),
        }
    }
}

/// A request to move funds out of a wallet, gated by manual review.
///
/// The wallet is NOT debited at request or approval time; funds leave the
/// wallet only on completion, and the completion posting is keyed so a
/// retried completion cannot debit twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    id: WithdrawalId,
    wallet_id: WalletId,
    amount: Money,
    payment_method: String,
    payment_details: String,
    status: WithdrawalStatus,
    /// Journal entry posted on completion; None until then.
    transaction_id: Option<TransactionId>,
    /// Reviewer who approved the request.
    processed_by: Option<UserId>,
    rejection_reason: Option<String>,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Withdrawal {
    /// Open a new request in `Pending`.
    pub fn request(
        id: WithdrawalId,
        wallet_id: WalletId,
        amount: Money,
        payment_method: impl Into<String>,
        payment_details: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !amount.is_positive() {
            return Err(DomainError::invalid_amount(format!(
                "withdrawal amount must be positive, got {amount}"
            )));
        }
        Ok(Self {
            id,
            wallet_id,
            amount,
            payment_method: payment_method.into(),
            payment_details: payment_details.into(),
            status: WithdrawalStatus::Pending,
            transaction_id: None,
            processed_by: None,
            rejection_reason: None,
            requested_at: now,
            processed_at: None,
            completed_at: None,
            version: 1,
        })
    }

    /// Rehydrate from stored columns.
    #[allow(clippy::too_many_arguments)]
    pub fn from_stored(
        id: WithdrawalId,
        wallet_id: WalletId,
        amount: Money,
        payment_method: String,
        payment_details: String,
        status: WithdrawalStatus,
        transaction_id: Option<TransactionId>,
        processed_by: Option<UserId>,
        rejection_reason: Option<String>,
        requested_at: DateTime<Utc>,
        processed_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            id,
            wallet_id,
            amount,
            payment_method,
            payment_details,
            status,
            transaction_id,
            processed_by,
            rejection_reason,
            requested_at,
            processed_at,
            completed_at,
            version,
        }
    }

    pub fn id_typed(&self) -> WithdrawalId {
        self.id
    }

    pub fn wallet_id(&self) -> WalletId {
        self.wallet_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn payment_method(&self) -> &str {
        &self.payment_method
    }

    pub fn payment_details(&self) -> &str {
        &self.payment_details
    }

    pub fn status(&self) -> WithdrawalStatus {
        self.status
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn processed_by(&self) -> Option<UserId> {
        self.processed_by
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Key for the completion posting. Derived from the withdrawal's
    /// identity, so every retry of the same completion collides in the
    /// journal instead of double-debiting.
    pub fn completion_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive("withdrawal", &self.id.to_string(), "complete")
    }

    fn ensure_status(&self, expected: WithdrawalStatus, action: &str) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} a {} withdrawal",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Pending -> Approved.
    pub fn approve(&mut self, approver: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(WithdrawalStatus::Pending, "approve")?;
        self.status = WithdrawalStatus::Approved;
        self.processed_by = Some(approver);
        self.processed_at = Some(now);
        self.version += 1;
        Ok(())
    }

    /// Pending -> Rejected. Terminal; no funds ever moved.
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(WithdrawalStatus::Pending, "reject")?;
        self.status = WithdrawalStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        self.processed_at = Some(now);
        self.version += 1;
        Ok(())
    }

    /// Approved -> Completed, recording the journal entry that carried the
    /// debit. Completing from any other status is an invalid transition;
    /// callers that want complete-is-idempotent behavior check for
    /// `Completed` before calling.
    pub fn complete(&mut self, transaction_id: TransactionId, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_status(WithdrawalStatus::Approved, "complete")?;
        self.status = WithdrawalStatus::Completed;
        self.transaction_id = Some(transaction_id);
        self.completed_at = Some(now);
        self.version += 1;
        Ok(())
    }
}

impl AggregateRoot for Withdrawal {
    type Id = WithdrawalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payvault_core::Currency;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn test_withdrawal() -> Withdrawal {
        Withdrawal::request(
            WithdrawalId::new(AggregateId::new()),
            WalletId::new(AggregateId::new()),
            Money::parse("50", usd()).unwrap(),
            "bank_transfer",
            "account 123",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn request_starts_pending_at_version_one() {
        let w = test_withdrawal();
        assert_eq!(w.status(), WithdrawalStatus::Pending);
        assert_eq!(w.version(), 1);
        assert_eq!(w.transaction_id(), None);
        assert_eq!(w.processed_at(), None);
        assert_eq!(w.completed_at(), None);
    }

    #[test]
    fn request_rejects_non_positive_amount() {
        let err = Withdrawal::request(
            WithdrawalId::new(AggregateId::new()),
            WalletId::new(AggregateId::new()),
            Money::zero(usd()),
            "bank_transfer",
            "account 123",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidAmount(_)));
    }

    #[test]
    fn happy_path_runs_to_completed() {
        let mut w = test_withdrawal();
        let approver = UserId::new();
        w.approve(approver, Utc::now()).unwrap();
        assert_eq!(w.status(), WithdrawalStatus::Approved);
        assert_eq!(w.processed_by(), Some(approver));
        assert!(w.processed_at().is_some());

        let tx_id = TransactionId::new(AggregateId::new());
        w.complete(tx_id, Utc::now()).unwrap();
        assert_eq!(w.status(), WithdrawalStatus::Completed);
        assert_eq!(w.transaction_id(), Some(tx_id));
        assert!(w.completed_at().is_some());
        assert_eq!(w.version(), 3);
    }

    #[test]
    fn reject_records_reason() {
        let mut w = test_withdrawal();
        w.reject("payout details unverified", Utc::now()).unwrap();
        assert_eq!(w.status(), WithdrawalStatus::Rejected);
        assert_eq!(w.rejection_reason(), Some("payout details unverified"));
    }

    #[test]
    fn approve_after_reject_is_invalid() {
        let mut w = test_withdrawal();
        w.reject("duplicate request", Utc::now()).unwrap();
        let err = w.approve(UserId::new(), Utc::now()).unwrap_err();
        match err {
            DomainError::InvalidStateTransition(msg) => {
                assert!(msg.contains("rejected"), "unexpected message: {msg}");
            }
            other => panic!("expected invalid transition, got {other:?}"),
        }
        assert_eq!(w.status(), WithdrawalStatus::Rejected);
    }

    #[test]
    fn complete_requires_approval() {
        let mut w = test_withdrawal();
        let err = w
            .complete(TransactionId::new(AggregateId::new()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition(_)));
    }

    #[test]
    fn complete_twice_is_invalid_on_the_aggregate() {
        let mut w = test_withdrawal();
        w.approve(UserId::new(), Utc::now()).unwrap();
        w.complete(TransactionId::new(AggregateId::new()), Utc::now())
            .unwrap();
        assert!(w
            .complete(TransactionId::new(AggregateId::new()), Utc::now())
            .is_err());
    }

    #[test]
    fn completion_key_is_stable() {
        let w = test_withdrawal();
        assert_eq!(w.completion_key(), w.completion_key());
        assert_eq!(
            w.completion_key().as_str(),
            format!("withdrawal:{}:complete", w.id_typed())
        );
    }
}
