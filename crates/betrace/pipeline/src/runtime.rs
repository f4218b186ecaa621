//! The running pipeline: workers, tenant registry, and the public facade.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use betrace_aggregator::TraceAggregator;
use betrace_keys::{KeyCache, KeyProvider, LocalKeyProvider};
use betrace_ledger::{
    Account, AccountKind, AuditRecorder, InMemoryLedger, LedgerWriter, Transfer, TransferKind,
    TransferMetadata,
};
use betrace_rules::{RuleEngine, RuleOutcome};
use betrace_signal::{
    ComplianceEvidence, ControlMapping, EvidenceService, SignalQuery, SignalStore,
    TenantAccounts, TenantSignalSink, VerificationResult,
};
use betrace_types::{
    AccountId, PartitionId, Rule, Signal, SignalId, Span, TenantId, Trace, TraceId,
};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Ledger entities backing one registered tenant.
#[derive(Clone, Copy, Debug)]
pub struct TenantRegistration {
    pub tenant: TenantId,
    pub partition: PartitionId,
    /// Debit side for auth-decision audit events.
    pub auth_actor: AccountId,
    /// Debit side for signal and evidence transfers.
    pub signal_actor: AccountId,
    /// Credit side for everything tenant-scoped.
    pub context: AccountId,
}

struct IngestEnvelope {
    tenant: TenantId,
    span: Span,
}

/// A running pipeline instance.
///
/// Constructed with [`start`](Self::start); workers stop when
/// [`shutdown`](Self::shutdown) is awaited.
pub struct Pipeline {
    config: PipelineConfig,
    ledger: Arc<InMemoryLedger>,
    aggregator: Arc<TraceAggregator>,
    engine: Arc<RuleEngine>,
    signals: Arc<SignalStore>,
    evidence: Arc<EvidenceService>,
    keys: Arc<KeyCache>,
    audit: Arc<AuditRecorder>,
    tenants: Arc<DashMap<TenantId, TenantRegistration>>,
    trace_tenants: Arc<DashMap<TraceId, TenantId>>,
    next_partition: AtomicU32,
    span_tx: mpsc::Sender<IngestEnvelope>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Start a pipeline with a fresh in-memory ledger and the local key
    /// provider.
    pub fn start(config: PipelineConfig) -> Self {
        Self::start_with(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(LocalKeyProvider::new()),
        )
    }

    /// Start with externally owned ledger and key provider, so hosts and
    /// tests can inject failures and observe state.
    pub fn start_with(
        config: PipelineConfig,
        ledger: Arc<InMemoryLedger>,
        provider: Arc<dyn KeyProvider>,
    ) -> Self {
        let aggregator = Arc::new(TraceAggregator::new(chrono::Duration::seconds(
            config.idle_timeout_secs as i64,
        )));
        let engine = Arc::new(RuleEngine::with_limits(
            config.max_rules,
            config.eval_step_budget,
        ));
        let keys = Arc::new(KeyCache::with_ttl(
            provider,
            Duration::from_secs(config.private_key_ttl_secs),
        ));
        let signals = Arc::new(SignalStore::new(
            Arc::clone(&ledger) as Arc<dyn LedgerWriter>
        ));
        let evidence = Arc::new(EvidenceService::new(
            Arc::clone(&keys),
            Arc::clone(&signals),
            Arc::clone(&ledger) as Arc<dyn LedgerWriter>,
        ));
        let audit = Arc::new(AuditRecorder::new(
            Arc::clone(&ledger) as Arc<dyn LedgerWriter>,
            config.audit_buffer_capacity,
        ));

        let tenants = Arc::new(DashMap::new());
        let trace_tenants: Arc<DashMap<TraceId, TenantId>> = Arc::new(DashMap::new());
        let (span_tx, span_rx) = mpsc::channel(config.span_channel_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(spawn_ingest_worker(
            span_rx,
            Arc::clone(&aggregator),
            Arc::clone(&trace_tenants),
            shutdown_tx.subscribe(),
        ));
        tasks.push(spawn_sweep_worker(
            config.sweep_interval_ms,
            Arc::clone(&aggregator),
            Arc::clone(&engine),
            Arc::clone(&signals),
            Arc::clone(&audit),
            Arc::clone(&trace_tenants),
            shutdown_tx.subscribe(),
        ));

        info!(
            sweep_interval_ms = config.sweep_interval_ms,
            idle_timeout_secs = config.idle_timeout_secs,
            "pipeline started"
        );

        Self {
            config,
            ledger,
            aggregator,
            engine,
            signals,
            evidence,
            keys,
            audit,
            tenants,
            trace_tenants,
            next_partition: AtomicU32::new(1),
            span_tx,
            shutdown_tx,
            tasks,
        }
    }

    /// Register a tenant: one ledger partition plus its standing accounts.
    /// Idempotent; re-registering returns the existing registration.
    pub fn register_tenant(&self, tenant: TenantId) -> Result<TenantRegistration, PipelineError> {
        if let Some(existing) = self.tenants.get(&tenant) {
            return Ok(*existing);
        }

        let partition = PartitionId::new(self.next_partition.fetch_add(1, Ordering::SeqCst));
        self.ledger.create_partition(partition, tenant)?;

        let auth_actor = Account::new(AccountKind::AuthEvent, tenant, partition);
        let signal_actor = Account::new(AccountKind::System, tenant, partition);
        let context = Account::new(AccountKind::TenantContext, tenant, partition);
        let registration = TenantRegistration {
            tenant,
            partition,
            auth_actor: auth_actor.id,
            signal_actor: signal_actor.id,
            context: context.id,
        };
        self.ledger.create_account(auth_actor)?;
        self.ledger.create_account(signal_actor)?;
        self.ledger.create_account(context)?;

        self.signals.register_tenant(
            tenant,
            TenantAccounts {
                partition,
                actor: registration.signal_actor,
                context: registration.context,
            },
        );
        self.tenants.insert(tenant, registration);
        info!(tenant = %tenant, partition = %partition, "tenant registered");
        Ok(registration)
    }

    pub fn load_rule(&self, rule: Rule) -> Result<(), PipelineError> {
        self.engine.load_rule(rule)?;
        Ok(())
    }

    /// Submit one span for aggregation. Malformed spans are rejected here
    /// at the boundary; everything else is asynchronous.
    pub async fn ingest_span(&self, tenant: TenantId, span: Span) -> Result<(), PipelineError> {
        if !self.tenants.contains_key(&tenant) {
            return Err(PipelineError::UnknownTenant(tenant));
        }
        TraceAggregator::validate_span(&span)?;
        self.span_tx
            .send(IngestEnvelope { tenant, span })
            .await
            .map_err(|_| PipelineError::IngestClosed)
    }

    /// Submit a batch of spans. Malformed members are skipped and
    /// counted; well-formed members are ingested. Returns
    /// `(ingested, failed)`.
    pub async fn ingest_batch(
        &self,
        tenant: TenantId,
        spans: Vec<Span>,
    ) -> Result<(usize, usize), PipelineError> {
        if !self.tenants.contains_key(&tenant) {
            return Err(PipelineError::UnknownTenant(tenant));
        }
        let mut ingested = 0;
        let mut failed = 0;
        for span in spans {
            if let Err(err) = TraceAggregator::validate_span(&span) {
                debug!("batch member rejected: {err}");
                failed += 1;
                continue;
            }
            self.span_tx
                .send(IngestEnvelope { tenant, span })
                .await
                .map_err(|_| PipelineError::IngestClosed)?;
            ingested += 1;
        }
        Ok((ingested, failed))
    }

    /// Record an authentication decision on the audit trail and return
    /// the decision to the caller. The audit write degrades on ledger
    /// unavailability; the caller's auth flow never fails because of it.
    pub fn record_auth_decision(
        &self,
        tenant: TenantId,
        principal: &str,
        allowed: bool,
    ) -> Result<bool, PipelineError> {
        let registration = self
            .tenants
            .get(&tenant)
            .map(|r| *r)
            .ok_or(PipelineError::UnknownTenant(tenant))?;

        let verdict = if allowed { "granted" } else { "denied" };
        let transfer = Transfer::new(
            registration.auth_actor,
            registration.context,
            TransferKind::AuthDecision,
            TransferMetadata {
                tenant_id: tenant,
                trace_id: None,
                reference: Some(format!("{principal}:{verdict}")),
            },
            registration.partition,
        );
        self.audit.record(transfer);
        Ok(allowed)
    }

    /// Generate signed compliance evidence for a recorded signal, under a
    /// hard timeout covering the key fetch and ledger write.
    pub async fn generate_evidence(
        &self,
        signal_id: SignalId,
        mapping: &ControlMapping,
    ) -> Result<ComplianceEvidence, PipelineError> {
        let signal = self
            .signals
            .get_signal(signal_id)
            .ok_or(PipelineError::UnknownSignal(signal_id))?;

        let timeout = Duration::from_millis(self.config.signing_timeout_ms);
        match tokio::time::timeout(timeout, self.evidence.generate(&signal, mapping)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::Timeout(self.config.signing_timeout_ms)),
        }
    }

    pub fn verify_evidence(&self, evidence: &ComplianceEvidence) -> VerificationResult {
        self.evidence.verify(evidence)
    }

    pub async fn rotate_tenant_key(&self, tenant: TenantId) -> Result<(), PipelineError> {
        Ok(self.keys.rotate_key(tenant).await?)
    }

    pub fn query_signals(&self, query: &SignalQuery) -> Result<Vec<Signal>, PipelineError> {
        Ok(self.signals.query_signals(query)?)
    }

    /// Evaluate one drained trace inline instead of waiting for the sweep
    /// ticker. Hosts use this for synchronous backfills.
    pub fn evaluate_trace(&self, tenant: TenantId, trace: &Trace) -> Vec<RuleOutcome> {
        let sink = TenantSignalSink::new(Arc::clone(&self.signals), tenant);
        self.engine.evaluate_all(tenant, trace, &sink)
    }

    pub fn ledger(&self) -> &Arc<InMemoryLedger> {
        &self.ledger
    }

    pub fn aggregator(&self) -> &Arc<TraceAggregator> {
        &self.aggregator
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn signals(&self) -> &Arc<SignalStore> {
        &self.signals
    }

    pub fn evidence(&self) -> &Arc<EvidenceService> {
        &self.evidence
    }

    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    pub fn audit(&self) -> &Arc<AuditRecorder> {
        &self.audit
    }

    /// Stop the workers and wait for them to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("pipeline stopped");
    }
}

fn spawn_ingest_worker(
    mut span_rx: mpsc::Receiver<IngestEnvelope>,
    aggregator: Arc<TraceAggregator>,
    trace_tenants: Arc<DashMap<TraceId, TenantId>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                envelope = span_rx.recv() => {
                    let Some(IngestEnvelope { tenant, span }) = envelope else {
                        break;
                    };
                    // First writer pins the trace's tenant; a trace never
                    // spans tenants.
                    trace_tenants.entry(span.trace_id.clone()).or_insert(tenant);
                    if let Err(err) = aggregator.add_span(span) {
                        debug!("span rejected during aggregation: {err}");
                    }
                }
            }
        }
    })
}

fn spawn_sweep_worker(
    sweep_interval_ms: u64,
    aggregator: Arc<TraceAggregator>,
    engine: Arc<RuleEngine>,
    signals: Arc<SignalStore>,
    audit: Arc<AuditRecorder>,
    trace_tenants: Arc<DashMap<TraceId, TenantId>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(sweep_interval_ms.max(1)));
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    // Opportunistically drain any audit events buffered
                    // during a ledger outage.
                    audit.flush();

                    for trace_id in aggregator.sweep(Utc::now()) {
                        let trace = match aggregator.drain(&trace_id) {
                            Ok(trace) => trace,
                            Err(err) => {
                                debug!(trace_id = %trace_id, "drain skipped: {err}");
                                continue;
                            }
                        };
                        let Some((_, tenant)) = trace_tenants.remove(&trace_id) else {
                            warn!(trace_id = %trace_id, "trace has no tenant mapping, dropping");
                            continue;
                        };

                        let sink = TenantSignalSink::new(Arc::clone(&signals), tenant);
                        let outcomes = engine.evaluate_all(tenant, &trace, &sink);
                        let matched = outcomes.iter().filter(|o| o.matched).count();
                        debug!(
                            trace_id = %trace_id,
                            spans = trace.span_count(),
                            rules = outcomes.len(),
                            matched,
                            "trace evaluated"
                        );
                    }
                }
            }
        }
    })
}
