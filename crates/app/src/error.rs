use thiserror::Error;

use payvault_core::DomainError;
use payvault_infra::StoreError;

/// Failures surfaced by the application services: either a business-rule
/// violation from the domain or an infrastructure failure from the store.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// True for transient failures a caller may retry (version conflicts).
    /// Business failures are deterministic and retrying cannot help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Store(e) if e.is_conflict())
    }
}
