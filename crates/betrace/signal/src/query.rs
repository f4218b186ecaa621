//! Signal query filters.

use chrono::{DateTime, Utc};

use betrace_types::{Severity, Signal, SignalStatus, TenantId};

pub const DEFAULT_SIGNAL_QUERY_LIMIT: usize = 100;

/// Filter for [`SignalStore::query_signals`](crate::SignalStore). Always
/// tenant-scoped; results are ordered by creation time ascending.
#[derive(Clone, Debug)]
pub struct SignalQuery {
    pub tenant_id: TenantId,
    pub severity: Option<Severity>,
    pub status: Option<SignalStatus>,
    /// Inclusive lower bound on creation time.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time.
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl SignalQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            severity: None,
            status: None,
            from: None,
            to: None,
            limit: DEFAULT_SIGNAL_QUERY_LIMIT,
            offset: 0,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn status(mut self, status: SignalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn matches(&self, signal: &Signal) -> bool {
        if signal.tenant_id != self.tenant_id {
            return false;
        }
        if let Some(severity) = self.severity {
            if signal.severity != severity {
                return false;
            }
        }
        if let Some(status) = self.status {
            if signal.status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if signal.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if signal.created_at >= to {
                return false;
            }
        }
        true
    }
}
