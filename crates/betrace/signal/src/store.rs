//! Signal store: ledger write-through persistence and status transitions.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use betrace_ledger::{
    LedgerError, LedgerWriter, Transfer, TransferKind, TransferMetadata,
};
use betrace_types::{
    AccountId, PartitionId, Signal, SignalId, SignalStatus, TenantId, TransferId,
};

use crate::error::SignalError;
use crate::query::SignalQuery;

/// Ledger accounts backing one tenant's signal and evidence transfers.
#[derive(Clone, Copy, Debug)]
pub struct TenantAccounts {
    pub partition: PartitionId,
    /// Debit side: the detecting system.
    pub actor: AccountId,
    /// Credit side: the tenant context.
    pub context: AccountId,
}

/// Persists signals with write-through to the ledger.
///
/// Unlike audit-event recording, signal persistence never degrades: a
/// ledger failure surfaces to the caller as a retryable error. Retries are
/// idempotent because the ledger transfer id is derived from the signal id.
pub struct SignalStore {
    ledger: Arc<dyn LedgerWriter>,
    tenants: DashMap<TenantId, TenantAccounts>,
    signals: RwLock<HashMap<SignalId, Signal>>,
}

impl SignalStore {
    pub fn new(ledger: Arc<dyn LedgerWriter>) -> Self {
        Self {
            ledger,
            tenants: DashMap::new(),
            signals: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_tenant(&self, tenant: TenantId, accounts: TenantAccounts) {
        self.tenants.insert(tenant, accounts);
    }

    pub fn accounts_for(&self, tenant: TenantId) -> Result<TenantAccounts, SignalError> {
        self.tenants
            .get(&tenant)
            .map(|a| *a)
            .ok_or(SignalError::TenantNotRegistered(tenant))
    }

    /// Persist one signal. Writes the ledger transfer first, then the
    /// store; a duplicate transfer id means an earlier attempt already
    /// committed, so the retry completes instead of failing.
    pub fn record_signal(&self, signal: Signal) -> Result<SignalId, SignalError> {
        if signal.tenant_id.is_nil() {
            return Err(SignalError::MissingTenantId);
        }
        if signal.trace_id.is_empty() {
            return Err(SignalError::MissingTraceContext);
        }
        let accounts = self.accounts_for(signal.tenant_id)?;

        let transfer = Transfer::new(
            accounts.actor,
            accounts.context,
            TransferKind::Signal,
            TransferMetadata {
                tenant_id: signal.tenant_id,
                trace_id: Some(signal.trace_id.clone()),
                reference: Some(signal.id.to_string()),
            },
            accounts.partition,
        )
        .with_id(TransferId::from_uuid(signal.id.as_uuid()));

        match self.ledger.create_transfer(transfer) {
            Ok(()) => {}
            Err(LedgerError::DuplicateTransferId(_)) => {
                debug!(signal_id = %signal.id, "signal transfer already committed, completing retry");
            }
            Err(err) => return Err(SignalError::LedgerWrite(err)),
        }

        let id = signal.id;
        self.signals.write().insert(id, signal);
        Ok(id)
    }

    pub fn get_signal(&self, id: SignalId) -> Option<Signal> {
        self.signals.read().get(&id).cloned()
    }

    /// Explicit status-transition API, the only mutation signals support.
    pub fn transition_status(
        &self,
        id: SignalId,
        next: SignalStatus,
    ) -> Result<(), SignalError> {
        let mut signals = self.signals.write();
        let signal = signals.get_mut(&id).ok_or(SignalError::UnknownSignal(id))?;
        if !signal.status.can_transition_to(next) {
            return Err(SignalError::InvalidStatusTransition {
                from: signal.status,
                to: next,
            });
        }
        signal.status = next;
        Ok(())
    }

    /// Query signals; empty results are `Ok`, a malformed query is
    /// rejected with a typed error.
    pub fn query_signals(&self, query: &SignalQuery) -> Result<Vec<Signal>, SignalError> {
        if query.limit == 0 {
            return Err(SignalError::QueryRejected("limit must be positive".into()));
        }
        let signals = self.signals.read();
        let mut results: Vec<Signal> = signals
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(results
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}
