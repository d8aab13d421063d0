//! Withdrawal domain module: the approval state machine for moving funds
//! out of the platform.

pub mod withdrawal;

pub use withdrawal::{Withdrawal, WithdrawalId, WithdrawalStatus};
