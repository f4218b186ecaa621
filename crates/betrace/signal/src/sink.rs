//! The sandboxed capability adapter handed to rule evaluation.

use std::sync::Arc;

use chrono::Utc;

use betrace_rules::{CapabilityError, SignalDraft, SignalSink};
use betrace_types::{Signal, SignalId, SignalStatus, TenantId};

use crate::store::SignalStore;

/// [`SignalSink`] implementation bound to exactly one tenant.
///
/// The tenant is fixed at construction; rule code receives only the trait
/// object and has no way to name, observe, or reach any other tenant's
/// store. This is the entire capability surface of a rule evaluation.
pub struct TenantSignalSink {
    store: Arc<SignalStore>,
    tenant: TenantId,
}

impl TenantSignalSink {
    pub fn new(store: Arc<SignalStore>, tenant: TenantId) -> Self {
        Self { store, tenant }
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }
}

impl SignalSink for TenantSignalSink {
    fn create_signal(&self, draft: SignalDraft) -> Result<SignalId, CapabilityError> {
        let signal = Signal {
            id: SignalId::generate(),
            tenant_id: self.tenant,
            rule_id: draft.rule_id,
            rule_name: draft.rule_name,
            trace_id: draft.trace_id,
            severity: draft.severity,
            status: SignalStatus::Open,
            message: draft.message,
            matched_spans: draft.matched_spans,
            created_at: Utc::now(),
        };

        self.store.record_signal(signal).map_err(|err| {
            if err.is_retryable() {
                CapabilityError::SinkUnavailable(err.to_string())
            } else {
                CapabilityError::Rejected(err.to_string())
            }
        })
    }
}
