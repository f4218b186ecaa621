//! Pipeline configuration.

use serde::Deserialize;

/// Tunables for a pipeline instance. Defaults are starting points, not
/// contracts; deserialize from whatever config source hosts this crate.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Idle window after the last span before a trace counts as complete.
    pub idle_timeout_secs: u64,
    /// How often the sweep ticker promotes and drains completed traces.
    pub sweep_interval_ms: u64,
    /// Per-evaluation step budget for rule execution.
    pub eval_step_budget: u64,
    /// Upper bound on compiled rules held in memory.
    pub max_rules: usize,
    /// Capacity of the degrade-and-buffer audit queue.
    pub audit_buffer_capacity: usize,
    /// Capacity of the bounded span ingestion channel.
    pub span_channel_capacity: usize,
    /// TTL for decrypted private key material in the key cache.
    pub private_key_ttl_secs: u64,
    /// Hard timeout for evidence signing (key fetch included).
    pub signing_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            sweep_interval_ms: 1000,
            eval_step_budget: 100_000,
            max_rules: 100_000,
            audit_buffer_capacity: 1000,
            span_channel_capacity: 1024,
            private_key_ttl_secs: 3600,
            signing_timeout_ms: 5000,
        }
    }
}
