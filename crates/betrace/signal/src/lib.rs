//! BeTrace Signal - signal persistence and signed compliance evidence.
//!
//! Signals write through to the ledger and never drop silently: a ledger
//! failure surfaces as a retryable error because signals drive incident
//! response. Compliance-relevant signals additionally produce evidence
//! records, serialized canonically and signed with the tenant's Ed25519
//! key so that any independent verifier reproduces the exact signed bytes.

#![deny(unsafe_code)]

mod canonical;
mod error;
mod evidence;
mod query;
mod sink;
mod store;

pub use canonical::canonical_json;
pub use error::SignalError;
pub use evidence::{
    AnnotatedEvidence, ComplianceEvidence, ControlMapping, EvidenceService, VerificationResult,
};
pub use query::SignalQuery;
pub use sink::TenantSignalSink;
pub use store::{SignalStore, TenantAccounts};
