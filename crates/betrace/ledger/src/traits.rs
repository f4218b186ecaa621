use betrace_types::{AccountId, PartitionId, TenantId, TransferId};

use crate::error::LedgerError;
use crate::query::{TransferFilter, TransferPage};
use crate::record::{Account, Transfer};

/// Write boundary for ledger append operations.
///
/// Implementations enforce single-writer-per-partition semantics
/// internally; callers never take external locks.
pub trait LedgerWriter: Send + Sync {
    /// Register a tenant partition. Partitions must exist before any
    /// account or transfer references them.
    fn create_partition(&self, partition: PartitionId, tenant: TenantId)
        -> Result<(), LedgerError>;

    fn create_account(&self, account: Account) -> Result<(), LedgerError>;

    /// Commit one transfer. On success the ledger assigns a nanosecond
    /// timestamp that is monotonically increasing and unique within the
    /// partition.
    fn create_transfer(&self, transfer: Transfer) -> Result<(), LedgerError>;

    /// Commit a batch atomically: either every transfer commits, or none
    /// do and the error names the first rejected member.
    fn create_transfers_linked(&self, transfers: Vec<Transfer>) -> Result<(), LedgerError>;
}

/// Read boundary for ledger queries.
///
/// All reads are consistent snapshots as of the read's start; a query
/// scoped to partition P never observes transfers in partition Q.
pub trait LedgerReader: Send + Sync {
    /// Query committed transfers ordered by commit timestamp ascending.
    /// The returned page carries a continuation token for restartable
    /// pagination.
    fn query_transfers(&self, filter: &TransferFilter) -> Result<TransferPage, LedgerError>;

    fn get_transfer(
        &self,
        partition: PartitionId,
        id: TransferId,
    ) -> Result<Option<Transfer>, LedgerError>;

    fn get_account(
        &self,
        partition: PartitionId,
        id: AccountId,
    ) -> Result<Option<Account>, LedgerError>;
}
