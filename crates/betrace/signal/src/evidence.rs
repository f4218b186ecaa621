//! Compliance evidence: canonically serialized, Ed25519-signed records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::Signature;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use betrace_keys::KeyCache;
use betrace_ledger::{LedgerWriter, Transfer, TransferKind, TransferMetadata};
use betrace_types::{EvidenceId, Signal, TenantId, TraceId, TransferId};

use crate::canonical::canonical_json;
use crate::error::SignalError;
use crate::store::SignalStore;

/// Which control of which compliance framework this evidence exercises.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlMapping {
    pub framework: String,
    pub control_id: String,
}

/// A signed assertion that a control was exercised, linked to a signal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplianceEvidence {
    pub id: EvidenceId,
    pub tenant_id: TenantId,
    pub framework: String,
    pub control_id: String,
    pub signal_id: betrace_types::SignalId,
    pub trace_id: TraceId,
    /// Millisecond timestamp; an integer so the canonical form is exact.
    pub recorded_at_ms: i64,
    /// Version of the tenant key that produced the signature.
    pub key_version: Option<u32>,
    /// Hex-encoded Ed25519 signature over the canonical serialization.
    /// Absent on records predating signing support.
    pub signature: Option<String>,
}

impl ComplianceEvidence {
    /// The exact bytes that are signed: every field except the signature
    /// itself, in canonical JSON.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SignalError> {
        let value = json!({
            "id": self.id.to_string(),
            "tenant_id": self.tenant_id.to_string(),
            "framework": self.framework,
            "control_id": self.control_id,
            "signal_id": self.signal_id.to_string(),
            "trace_id": self.trace_id.to_string(),
            "recorded_at_ms": self.recorded_at_ms,
            "key_version": self.key_version,
        });
        Ok(canonical_json(&value)?.into_bytes())
    }
}

/// Outcome of verifying one evidence record. `valid: None` means the
/// record predates signing support - unknown, not failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: Option<bool>,
    pub error: Option<String>,
}

impl VerificationResult {
    fn ok() -> Self {
        Self {
            valid: Some(true),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: Some(false),
            error: Some(error.into()),
        }
    }

    fn unknown() -> Self {
        Self {
            valid: None,
            error: None,
        }
    }
}

/// Evidence record annotated with its current verification status, as
/// exposed by the evidence query API.
#[derive(Clone, Debug)]
pub struct AnnotatedEvidence {
    pub evidence: ComplianceEvidence,
    pub signature_valid: Option<bool>,
}

/// Generates, persists, and verifies compliance evidence.
pub struct EvidenceService {
    keys: Arc<KeyCache>,
    store: Arc<SignalStore>,
    ledger: Arc<dyn LedgerWriter>,
    evidence: RwLock<HashMap<EvidenceId, ComplianceEvidence>>,
}

impl EvidenceService {
    pub fn new(keys: Arc<KeyCache>, store: Arc<SignalStore>, ledger: Arc<dyn LedgerWriter>) -> Self {
        Self {
            keys,
            store,
            ledger,
            evidence: RwLock::new(HashMap::new()),
        }
    }

    /// Build, sign, and persist an evidence record for a signal.
    ///
    /// Signing-key or ledger unavailability surfaces as a retryable
    /// error; nothing is persisted on failure.
    pub async fn generate(
        &self,
        signal: &Signal,
        mapping: &ControlMapping,
    ) -> Result<ComplianceEvidence, SignalError> {
        if signal.tenant_id.is_nil() {
            return Err(SignalError::MissingTenantId);
        }
        if signal.trace_id.is_empty() {
            return Err(SignalError::MissingTraceContext);
        }
        let accounts = self.store.accounts_for(signal.tenant_id)?;

        let handle = self
            .keys
            .get_signing_key(signal.tenant_id)
            .await
            .map_err(|err| SignalError::SigningKeyUnavailable(err.to_string()))?;

        let mut evidence = ComplianceEvidence {
            id: EvidenceId::generate(),
            tenant_id: signal.tenant_id,
            framework: mapping.framework.clone(),
            control_id: mapping.control_id.clone(),
            signal_id: signal.id,
            trace_id: signal.trace_id.clone(),
            recorded_at_ms: Utc::now().timestamp_millis(),
            key_version: Some(handle.version),
            signature: None,
        };
        let payload = evidence.canonical_bytes()?;
        evidence.signature = Some(hex::encode(handle.sign(&payload).to_bytes()));

        let transfer = Transfer::new(
            accounts.actor,
            accounts.context,
            TransferKind::Evidence,
            TransferMetadata {
                tenant_id: signal.tenant_id,
                trace_id: Some(signal.trace_id.clone()),
                reference: Some(evidence.id.to_string()),
            },
            accounts.partition,
        )
        .with_id(TransferId::from_uuid(evidence.id.as_uuid()));
        self.ledger.create_transfer(transfer)?;

        self.evidence.write().insert(evidence.id, evidence.clone());
        debug!(evidence_id = %evidence.id, signal_id = %signal.id, "compliance evidence recorded");
        Ok(evidence)
    }

    /// Recompute the canonical serialization and check the signature
    /// against the tenant's public key for the recorded key version.
    pub fn verify(&self, evidence: &ComplianceEvidence) -> VerificationResult {
        let Some(signature_hex) = &evidence.signature else {
            return VerificationResult::unknown();
        };

        let public = match self
            .keys
            .verifying_key(evidence.tenant_id, evidence.key_version)
        {
            Ok(key) => key,
            Err(err) => return VerificationResult::failed(err.to_string()),
        };

        let signature_bytes = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(err) => return VerificationResult::failed(format!("malformed signature: {err}")),
        };
        let signature = match Signature::from_slice(&signature_bytes) {
            Ok(signature) => signature,
            Err(err) => return VerificationResult::failed(format!("malformed signature: {err}")),
        };

        let payload = match evidence.canonical_bytes() {
            Ok(payload) => payload,
            Err(err) => return VerificationResult::failed(err.to_string()),
        };

        match public.verify_strict(&payload, &signature) {
            Ok(()) => VerificationResult::ok(),
            Err(_) => VerificationResult::failed("signature mismatch"),
        }
    }

    pub fn get_evidence(&self, id: EvidenceId) -> Option<ComplianceEvidence> {
        self.evidence.read().get(&id).cloned()
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Tenant-scoped evidence listing, each record annotated with its
    /// verification status.
    pub fn query_annotated(&self, tenant: TenantId) -> Vec<AnnotatedEvidence> {
        let evidence = self.evidence.read();
        let mut records: Vec<&ComplianceEvidence> = evidence
            .values()
            .filter(|e| e.tenant_id == tenant)
            .collect();
        records.sort_by_key(|e| (e.recorded_at_ms, e.id));
        records
            .into_iter()
            .map(|e| AnnotatedEvidence {
                evidence: e.clone(),
                signature_valid: self.verify(e).valid,
            })
            .collect()
    }
}
