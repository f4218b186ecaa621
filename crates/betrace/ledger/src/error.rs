use betrace_types::{AccountId, PartitionId, TransferId};
use thiserror::Error;

/// Errors returned by ledger interfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),

    #[error("ledger partition {0} is not registered")]
    InvalidLedgerPartition(PartitionId),

    #[error("partition {0} is already registered")]
    DuplicatePartition(PartitionId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("transfer {0} already committed")]
    DuplicateTransferId(TransferId),

    #[error("linked operation failed: transfer {failed_index} in batch rejected: {source}")]
    LinkedOperationFailed {
        failed_index: usize,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("query rejected: {0}")]
    QueryRejected(String),
}

impl LedgerError {
    /// Availability errors are retryable; validation errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}
