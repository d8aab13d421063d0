//! Application services: the orchestration layer that ties wallet and
//! withdrawal aggregates to the journal through atomic store commits.

pub mod error;
pub mod pricing;
pub mod reconcile;
pub mod services;
pub mod withdrawals;

pub use error::ServiceError;
pub use pricing::{PriceBreakdown, PricingPolicy};
pub use reconcile::ReconciliationService;
pub use services::{BalanceChange, LedgerService, TransferReceipt, MAX_COMMIT_ATTEMPTS};
pub use withdrawals::WithdrawalService;
