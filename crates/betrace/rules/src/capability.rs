//! The capability surface available to rule evaluation.
//!
//! This is the security boundary of the engine: rule code can observe the
//! trace it is handed and nothing else, and its only side-effect channel
//! is [`SignalSink::create_signal`]. The sink is injected explicitly into
//! each evaluation call and is bound to one tenant by its implementor -
//! a rule cannot name a tenant, so it cannot emit into another tenant's
//! store. There is no thread-local or global registration to clear.

use betrace_types::{RuleId, Severity, SignalId, SpanRef, TraceId};
use thiserror::Error;

/// Everything the engine knows about a match, handed to the sink. The
/// tenant is deliberately absent: the sink supplies it.
#[derive(Clone, Debug)]
pub struct SignalDraft {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub severity: Severity,
    pub trace_id: TraceId,
    pub message: String,
    pub matched_spans: Vec<SpanRef>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The signal store could not persist the signal. Retryable by the
    /// pipeline; the signal is never silently dropped.
    #[error("signal sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("signal rejected: {0}")]
    Rejected(String),
}

/// The single capability injected into rule evaluation.
pub trait SignalSink: Send + Sync {
    fn create_signal(&self, draft: SignalDraft) -> Result<SignalId, CapabilityError>;
}

/// Sink that collects drafts in memory. Test support.
#[derive(Default)]
pub struct CollectingSink {
    drafts: parking_lot::Mutex<Vec<SignalDraft>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drafts(&self) -> Vec<SignalDraft> {
        self.drafts.lock().clone()
    }
}

impl SignalSink for CollectingSink {
    fn create_signal(&self, draft: SignalDraft) -> Result<SignalId, CapabilityError> {
        self.drafts.lock().push(draft);
        Ok(SignalId::generate())
    }
}
