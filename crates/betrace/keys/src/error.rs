use betrace_types::TenantId;
use thiserror::Error;

/// Errors from key provisioning and caching.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The external provider could not be reached. Callers needing to
    /// sign defer or fail that step; nothing else blocks on this.
    #[error("key provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no key material for tenant {0}")]
    KeyNotFound(TenantId),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
