//! Identifier newtypes.
//!
//! Ledger-resident entities (accounts, transfers, tenants, signals) use
//! 128-bit UUIDs. Trace and span ids are opaque strings as delivered by the
//! OpenTelemetry wire model. Rule ids are tenant-chosen strings so that
//! deterministic ordering by rule id is meaningful to rule authors.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// True when this is the all-zero (nil) id.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Tenant identifier; one ledger partition per tenant.
    TenantId
);
uuid_id!(
    /// Ledger account identifier.
    AccountId
);
uuid_id!(
    /// Ledger transfer identifier.
    TransferId
);
uuid_id!(
    /// Signal identifier.
    SignalId
);
uuid_id!(
    /// Compliance evidence record identifier.
    EvidenceId
);

string_id!(
    /// Trace identifier as carried on ingested spans.
    TraceId
);
string_id!(
    /// Span identifier as carried on ingested spans.
    SpanId
);
string_id!(
    /// Tenant-chosen rule identifier.
    RuleId
);

/// Ledger partition identifier.
///
/// Partitions are the tenant isolation boundary inside the append-only
/// store: a query scoped to one partition never observes another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(TenantId::generate(), TenantId::generate());
        assert_ne!(TransferId::generate(), TransferId::generate());
    }

    #[test]
    fn string_ids_compare_by_content() {
        assert_eq!(TraceId::from("t1"), TraceId::new("t1"));
        assert!(RuleId::from("a") < RuleId::from("b"));
    }

    #[test]
    fn nil_tenant_is_detectable() {
        let nil = TenantId::from_uuid(Uuid::nil());
        assert!(nil.is_nil());
        assert!(!TenantId::generate().is_nil());
    }
}
