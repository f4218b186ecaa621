use betrace_aggregator::AggregatorError;
use betrace_keys::KeyError;
use betrace_ledger::LedgerError;
use betrace_rules::RuleError;
use betrace_signal::SignalError;
use betrace_types::{SignalId, TenantId};
use thiserror::Error;

/// Errors surfaced by the pipeline facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tenant {0} is not registered")]
    UnknownTenant(TenantId),

    #[error("signal not found: {0}")]
    UnknownSignal(SignalId),

    #[error("span ingestion channel closed")]
    IngestClosed,

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Keys(#[from] KeyError),
}
