//! Error types for admission, accounting and key storage.
use crate::timeout::TimedOut;

/// Failures of the persisted key table.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("key table i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The persisted table is not a valid key table.
    #[error("key table is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Storage did not answer within its budget.
    #[error("key table access: {0}")]
    Timeout(#[from] TimedOut),
}

/// Unified error type for the admission gate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum GateError {
    /// No key was supplied with the request.
    #[error("an API key is required")]
    MissingKey,
    /// The supplied key is not present in the key table.
    #[error("the API key is not recognized")]
    InvalidKey,
    /// The key has used up its quota.
    #[error("quota exhausted ({used} of {limit} requests used)")]
    QuotaExceeded { used: u64, limit: u64 },
    /// The key table could not be loaded or saved.
    #[error("key storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
    /// The wrapped capability failed; usage was not charged.
    #[error("handler failed: {0}")]
    HandlerFailure(String),
}

impl GateError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingKey => "missing_key",
            Self::InvalidKey => "invalid_key",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::HandlerFailure(_) => "handler_failure",
        }
    }

    /// Client-side authorization failure (never retried automatically).
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::MissingKey | Self::InvalidKey | Self::QuotaExceeded { .. })
    }

    /// Server-side failure that a client may safely retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Check if this error is a quota denial.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Access `(used, limit)` for a quota denial.
    pub fn quota_details(&self) -> Option<(u64, u64)> {
        match self {
            Self::QuotaExceeded { used, limit } => Some((*used, *limit)),
            _ => None,
        }
    }
}
