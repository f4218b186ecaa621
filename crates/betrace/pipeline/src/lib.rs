//! BeTrace Pipeline - wires the core components into a running system.
//!
//! Span ingestion, trace aggregation, and rule evaluation run on
//! independent tokio tasks communicating over bounded channels; the
//! ledger is the single serialization point. Rule evaluation receives its
//! capability object explicitly per call, and the auth-audit path goes
//! through the degrading recorder so an unavailable ledger never blocks
//! an authentication response.

#![deny(unsafe_code)]

mod config;
mod error;
mod runtime;
pub mod telemetry;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use runtime::{Pipeline, TenantRegistration};
