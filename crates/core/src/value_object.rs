//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Money`
/// instances with the same minor amount and currency are the same money.
/// To "modify" one, construct a new value — this keeps them safe to copy
/// around and share between aggregates.
///
/// Contrast with entities/aggregates, which carry identity: two wallets with
/// the same balance are still different wallets.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
