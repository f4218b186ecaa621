//! BeTrace Types - shared identifiers and domain types
//!
//! Leaf crate of the workspace: every other BeTrace crate depends on it.
//! Holds the span/trace model, tenant-scoped rule and signal records, and
//! the id newtypes used across the pipeline.

#![deny(unsafe_code)]

mod ids;
mod rule;
mod signal;
mod span;

pub use ids::{
    AccountId, EvidenceId, PartitionId, RuleId, SignalId, SpanId, TenantId, TraceId, TransferId,
};
pub use rule::{Rule, Severity};
pub use signal::{Signal, SignalStatus, SpanRef};
pub use span::{AttrValue, Span, Trace};
