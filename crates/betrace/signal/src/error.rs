use betrace_ledger::LedgerError;
use betrace_types::{SignalId, SignalStatus, TenantId};
use thiserror::Error;

/// Errors from signal persistence and evidence generation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal has no tenant id")]
    MissingTenantId,

    #[error("signal has no trace context")]
    MissingTraceContext,

    #[error("tenant {0} is not registered with the signal store")]
    TenantNotRegistered(TenantId),

    #[error("signal not found: {0}")]
    UnknownSignal(SignalId),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: SignalStatus,
        to: SignalStatus,
    },

    /// Ledger write failed. Retryable when the underlying error is; the
    /// signal was not recorded and the caller must retry.
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[from] LedgerError),

    #[error("signing key unavailable: {0}")]
    SigningKeyUnavailable(String),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("canonical serialization failed: {0}")]
    Serialization(String),
}

impl SignalError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SignalError::LedgerWrite(inner) => inner.is_retryable(),
            SignalError::SigningKeyUnavailable(_) => true,
            _ => false,
        }
    }
}
