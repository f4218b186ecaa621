//! Ledger record types: accounts and transfers.
//!
//! Metadata is carried as explicit structured records rather than packed
//! 128-bit integers; the queryable fields are the contract, not the bit
//! layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use betrace_types::{AccountId, PartitionId, TenantId, TraceId, TransferId};

/// Discriminates what a ledger account represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Source of authentication/authorization decisions.
    AuthEvent,
    /// Metadata holder for a tenant's key material (never raw key bytes).
    KeyMetadata,
    /// Counterparty for verification events.
    Verification,
    /// Tenant-level context account credited by tenant activity.
    TenantContext,
    /// System counter account.
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// Structured account metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
    pub status: AccountStatus,
}

/// A ledger-resident entity: tenant, user, system counter, or key.
///
/// Accounts are never deleted or mutated after creation; the only change
/// an account ever sees is new transfers referencing it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub kind: AccountKind,
    pub metadata: AccountMetadata,
    pub partition: PartitionId,
}

impl Account {
    pub fn new(kind: AccountKind, tenant_id: TenantId, partition: PartitionId) -> Self {
        Self {
            id: AccountId::generate(),
            kind,
            metadata: AccountMetadata {
                tenant_id,
                created_at: Utc::now(),
                status: AccountStatus::Active,
            },
            partition,
        }
    }
}

/// The event category a transfer records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    AuthDecision,
    Redaction,
    KeyRotation,
    Verification,
    Signal,
    Evidence,
}

/// Structured transfer metadata: the queryable context of one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub tenant_id: TenantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    /// Free-form reference to the originating record (signal id, key id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// One immutable, append-only event record.
///
/// The `amount` is always a small counter, never a monetary value.
/// `timestamp_ns` is zero until the ledger assigns it at commit time; once
/// committed it is the sole ordering key for all queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// The actor side of the event.
    pub debit_account: AccountId,
    /// The context side (tenant or system).
    pub credit_account: AccountId,
    pub amount: u64,
    pub kind: TransferKind,
    pub metadata: TransferMetadata,
    pub partition: PartitionId,
    /// Nanosecond commit timestamp, assigned by the ledger.
    pub timestamp_ns: u64,
}

impl Transfer {
    pub fn new(
        debit_account: AccountId,
        credit_account: AccountId,
        kind: TransferKind,
        metadata: TransferMetadata,
        partition: PartitionId,
    ) -> Self {
        Self {
            id: TransferId::generate(),
            debit_account,
            credit_account,
            amount: 1,
            kind,
            metadata,
            partition,
            timestamp_ns: 0,
        }
    }

    pub fn with_id(mut self, id: TransferId) -> Self {
        self.id = id;
        self
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }
}
