//! Signal records - the output of a matched rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{RuleId, SignalId, SpanId, TenantId, TraceId};
use crate::rule::Severity;

/// Signal lifecycle status. Signals are soft-closed, never deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Open,
    Investigating,
    Resolved,
}

impl SignalStatus {
    /// Valid forward transitions. `Resolved` is terminal.
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        matches!(
            (self, next),
            (SignalStatus::Open, SignalStatus::Investigating)
                | (SignalStatus::Open, SignalStatus::Resolved)
                | (SignalStatus::Investigating, SignalStatus::Resolved)
        )
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStatus::Open => write!(f, "open"),
            SignalStatus::Investigating => write!(f, "investigating"),
            SignalStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Reference to a specific span involved in a signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub service_name: String,
}

/// A detected behavioral violation, produced by the rule engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub tenant_id: TenantId,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub trace_id: TraceId,
    pub severity: Severity,
    pub status: SignalStatus,
    pub message: String,
    /// The exact spans that satisfied the rule predicate.
    pub matched_spans: Vec<SpanRef>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(SignalStatus::Open.can_transition_to(SignalStatus::Investigating));
        assert!(SignalStatus::Open.can_transition_to(SignalStatus::Resolved));
        assert!(SignalStatus::Investigating.can_transition_to(SignalStatus::Resolved));

        assert!(!SignalStatus::Resolved.can_transition_to(SignalStatus::Open));
        assert!(!SignalStatus::Resolved.can_transition_to(SignalStatus::Investigating));
        assert!(!SignalStatus::Investigating.can_transition_to(SignalStatus::Open));
        assert!(!SignalStatus::Open.can_transition_to(SignalStatus::Open));
    }
}
