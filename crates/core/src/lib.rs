//! `payvault-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the ledger error taxonomy, strongly-typed identifiers, the exact-decimal
//! `Money` value type and the optimistic-concurrency primitives shared by all
//! aggregates.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use money::{Currency, Money, MONEY_SCALE};
pub use value_object::ValueObject;
