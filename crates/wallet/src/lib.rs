//! Wallet domain module.
//!
//! This crate contains the business rules for per-user wallets, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod wallet;

pub use wallet::{Wallet, WalletId, WalletStatus};
