//! Transfer query filters and pagination.

use betrace_types::{AccountId, PartitionId};

use crate::record::{Transfer, TransferKind};

pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filter for [`LedgerReader::query_transfers`](crate::LedgerReader).
///
/// Results are ordered by commit timestamp ascending. Pagination is
/// restartable: feed [`TransferPage::continuation`] back through
/// [`after_timestamp_ns`](Self::after_timestamp_ns) to resume.
#[derive(Clone, Debug)]
pub struct TransferFilter {
    pub partition: PartitionId,
    /// Matches transfers where the account is either side.
    pub account_id: Option<AccountId>,
    pub kind: Option<TransferKind>,
    /// Inclusive lower bound on commit timestamp.
    pub from_ns: Option<u64>,
    /// Exclusive upper bound on commit timestamp.
    pub to_ns: Option<u64>,
    pub limit: usize,
    /// Continuation token: only transfers strictly after this timestamp.
    pub after_timestamp_ns: Option<u64>,
}

impl TransferFilter {
    pub fn for_partition(partition: PartitionId) -> Self {
        Self {
            partition,
            account_id: None,
            kind: None,
            from_ns: None,
            to_ns: None,
            limit: DEFAULT_QUERY_LIMIT,
            after_timestamp_ns: None,
        }
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn kind(mut self, kind: TransferKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn time_range(mut self, from_ns: u64, to_ns: u64) -> Self {
        self.from_ns = Some(from_ns);
        self.to_ns = Some(to_ns);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn after_timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.after_timestamp_ns = Some(timestamp_ns);
        self
    }

    pub(crate) fn matches(&self, transfer: &Transfer) -> bool {
        if let Some(account) = self.account_id {
            if transfer.debit_account != account && transfer.credit_account != account {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if transfer.kind != kind {
                return false;
            }
        }
        if let Some(from) = self.from_ns {
            if transfer.timestamp_ns < from {
                return false;
            }
        }
        if let Some(to) = self.to_ns {
            if transfer.timestamp_ns >= to {
                return false;
            }
        }
        if let Some(after) = self.after_timestamp_ns {
            if transfer.timestamp_ns <= after {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Clone, Debug)]
pub struct TransferPage {
    pub transfers: Vec<Transfer>,
    /// Timestamp of the last returned transfer, if the page was full and
    /// more results may follow.
    pub continuation: Option<u64>,
}

impl TransferPage {
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }
}
