//! Tenant-scoped rule records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{RuleId, TenantId};

/// Signal severity, also used as the rule evaluation priority.
///
/// Ordering is semantic: `Critical > High > Medium > Low`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A user-authored pattern over traces, compiled on load by the rule engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Rule pattern-language source text.
    pub source: String,
    pub enabled: bool,
    pub severity: Severity,
    pub category: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
