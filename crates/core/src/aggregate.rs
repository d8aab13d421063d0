//! Aggregate root trait and optimistic-concurrency primitives.

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules can decide how they model
/// state transitions (direct guarded mutation here) without bringing in any
/// infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Every successful mutation bumps the version by one; the store uses it
    /// for optimistic concurrency checks at commit time.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate write.
///
/// `Exact(0)` expects the aggregate to be absent (insert); `Exact(n)` expects
/// the stored version to still be `n` (update of a previously loaded copy).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (idempotent writes, migrations).
    Any,
    /// Require the stored aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
