//! Journal module: the append-only record of every balance-affecting event,
//! plus read-only reconciliation against stored wallet balances.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod journal;
pub mod reconcile;

pub use journal::{EntityRef, IdempotencyKey, Transaction, TransactionId, TransactionKind};
pub use reconcile::{reconcile, ReconciliationOutcome, ReconciliationReport};
